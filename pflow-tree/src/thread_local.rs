//! `ThreadLocalTree`: each worker owns an independent [`TreeArena`] with no
//! cross-thread synchronization during ingestion; a separate merge pass
//! folds the per-worker trees into one (spec §4.7 "ThreadLocalMerge").
//! Merge is commutative and associative, so workers may be merged pairwise
//! in any order, including a parallel reduction tree.

use crate::arena::TreeArena;
use crate::shared::{BuildMode, ResolvedFrame, SampleCountMode};

pub struct ThreadLocalTree {
    arena: TreeArena,
}

impl ThreadLocalTree {
    pub fn new(build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        Self {
            arena: TreeArena::new(build_mode, sample_mode),
        }
    }

    pub fn insert(&mut self, frames: &[ResolvedFrame], process_id: usize, count: u64, time: f64) {
        self.arena.insert(frames, process_id, count, time);
    }

    pub fn into_arena(self) -> TreeArena {
        self.arena
    }

    pub fn arena(&self) -> &TreeArena {
        &self.arena
    }
}

/// Folds a collection of per-worker trees into one, in the order given.
/// Since merge is commutative and associative the caller is free to
/// instead reduce them pairwise in parallel; this sequential fold is
/// provided as the straightforward default.
pub fn merge_all(build_mode: BuildMode, sample_mode: SampleCountMode, workers: Vec<ThreadLocalTree>) -> TreeArena {
    let mut merged = TreeArena::new(build_mode, sample_mode);
    for worker in workers {
        merged.merge_from(&worker.into_arena());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame {
            raw_address: 0,
            library: "app".to_string(),
            offset: 0,
            function: Some(name.to_string()),
            file: None,
            line: None,
        }
    }

    #[test]
    fn merge_all_sums_every_worker() {
        let mut workers = Vec::new();
        for _ in 0..4 {
            let mut w = ThreadLocalTree::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
            w.insert(&[frame("main"), frame("work")], 0, 10, 1.0);
            workers.push(w);
        }
        let merged = merge_all(BuildMode::ContextFree, SampleCountMode::Inclusive, workers);
        assert_eq!(merged.node(crate::arena::ROOT).total_samples, 40);
    }
}
