//! `CoarseLockTree`: the whole arena behind one mutex (spec §4.7
//! "CoarseLock"). Simplest and safest model; serializes all insertions.

use parking_lot::Mutex;

use crate::arena::TreeArena;
use crate::shared::{BuildMode, ResolvedFrame, SampleCountMode};

pub struct CoarseLockTree {
    arena: Mutex<TreeArena>,
}

impl CoarseLockTree {
    pub fn new(build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        Self {
            arena: Mutex::new(TreeArena::new(build_mode, sample_mode)),
        }
    }

    pub fn insert(&self, frames: &[ResolvedFrame], process_id: usize, count: u64, time: f64) {
        self.arena.lock().insert(frames, process_id, count, time);
    }

    pub fn with_arena<R>(&self, f: impl FnOnce(&TreeArena) -> R) -> R {
        f(&self.arena.lock())
    }

    pub fn into_arena(self) -> TreeArena {
        self.arena.into_inner()
    }
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
    fn concurrent_inserts_are_serialized_correctly() {
        use std::sync::Arc;
        let tree = Arc::new(CoarseLockTree::new(
            BuildMode::ContextFree,
            SampleCountMode::Inclusive,
        ));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let tree = tree.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        tree.insert(&[frame("main"), frame("work")], 0, 1, 1.0);
                    }
                });
            }
        });
        tree.with_arena(|arena| {
            assert_eq!(arena.node(crate::arena::ROOT).total_samples, 800);
        });
    }
}
