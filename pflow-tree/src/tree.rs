//! Public entry point dispatching to one of the four concurrency-model
//! backends (spec §4.7 "Concurrency models"). The model is fixed at
//! construction; switching models on a live tree is not supported (spec
//! §5 "Analysis side").

use crate::arena::TreeArena;
use crate::coarse::CoarseLockTree;
use crate::fine_grained::FineGrainedTree;
use crate::lock_free::LockFreeTree;
use crate::shared::{BuildMode, ResolvedFrame, SampleCountMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyModel {
    #[default]
    CoarseLock,
    FineGrainedLock,
    /// Not represented as a live `PerformanceTree` variant: each worker
    /// builds an independent [`crate::thread_local::ThreadLocalTree`] with
    /// no shared state, and [`crate::thread_local::merge_all`] folds them
    /// into a settled tree once ingestion completes.
    ThreadLocalMerge,
    LockFree,
}

/// A live, insertable performance tree (spec §3 "Performance tree"). Use
/// [`PerformanceTree::finalize`] once ingestion is complete to get a
/// read-only [`TreeArena`] for traversal, analyzers, and serialization.
pub enum PerformanceTree {
    CoarseLock(CoarseLockTree),
    FineGrainedLock(FineGrainedTree),
    LockFree(LockFreeTree),
}

impl PerformanceTree {
    /// Builds a live tree under `model`. Panics if asked for
    /// `ConcurrencyModel::ThreadLocalMerge`, which has no shared live
    /// object to insert into — callers of that model build one
    /// [`crate::thread_local::ThreadLocalTree`] per worker directly.
    pub fn new(model: ConcurrencyModel, build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        match model {
            ConcurrencyModel::CoarseLock => {
                PerformanceTree::CoarseLock(CoarseLockTree::new(build_mode, sample_mode))
            }
            ConcurrencyModel::FineGrainedLock => {
                PerformanceTree::FineGrainedLock(FineGrainedTree::new(build_mode, sample_mode))
            }
            ConcurrencyModel::LockFree => {
                PerformanceTree::LockFree(LockFreeTree::new(build_mode, sample_mode))
            }
            ConcurrencyModel::ThreadLocalMerge => {
                panic!("ThreadLocalMerge has no shared live tree; build per-worker ThreadLocalTree instances instead")
            }
        }
    }

    pub fn insert(&self, frames: &[ResolvedFrame], process_id: usize, count: u64, time: f64) {
        match self {
            PerformanceTree::CoarseLock(t) => t.insert(frames, process_id, count, time),
            PerformanceTree::FineGrainedLock(t) => t.insert(frames, process_id, count, time),
            PerformanceTree::LockFree(t) => t.insert(frames, process_id, count, time),
        }
    }

    /// Consumes the live tree, producing a plain [`TreeArena`] for
    /// traversal, derived analyzers, and serialization.
    pub fn finalize(self) -> TreeArena {
        match self {
            PerformanceTree::CoarseLock(t) => t.into_arena(),
            PerformanceTree::FineGrainedLock(t) => t.into_arena(),
            PerformanceTree::LockFree(t) => t.into_arena(),
        }
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
    fn each_model_produces_equivalent_totals() {
        let stack = vec![frame("main"), frame("work")];
        for model in [
            ConcurrencyModel::CoarseLock,
            ConcurrencyModel::FineGrainedLock,
            ConcurrencyModel::LockFree,
        ] {
            let tree = PerformanceTree::new(model, BuildMode::ContextFree, SampleCountMode::Inclusive);
            for _ in 0..10 {
                tree.insert(&stack, 0, 1, 1.0);
            }
            let arena = tree.finalize();
            assert_eq!(arena.node(crate::arena::ROOT).total_samples, 10);
            assert_eq!(arena.node_count(), 3);
        }
    }

    #[test]
    #[should_panic(expected = "ThreadLocalMerge")]
    fn thread_local_merge_has_no_live_instance() {
        PerformanceTree::new(
            ConcurrencyModel::ThreadLocalMerge,
            BuildMode::ContextFree,
            SampleCountMode::Inclusive,
        );
    }
}
