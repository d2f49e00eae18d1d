//! `FineGrainedTree`: one mutex per node, locked root-downward and never
//! more than one node mutex held at a time, which rules out deadlock (spec
//! §4.7 "FineGrainedLock"). New nodes are appended to a shared,
//! append-only table; the table's `RwLock` is only ever taken *after* the
//! inserting node's own mutex has already been released or while holding
//! exactly one node mutex, never while holding two.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::arena::NodeId;
use crate::shared::{BuildMode, FrameKey, PerProcessCounters, ResolvedFrame, SampleCountMode};

pub const ROOT: NodeId = 0;

struct FineNodeData {
    parent: Option<NodeId>,
    frame: ResolvedFrame,
    children: FxHashMap<FrameKey, NodeId>,
    total_samples: u64,
    self_samples: u64,
    counters: PerProcessCounters,
}

pub struct FineGrainedTree {
    nodes: RwLock<Vec<Arc<Mutex<FineNodeData>>>>,
    build_mode: BuildMode,
    sample_mode: SampleCountMode,
    process_count: AtomicUsize,
}

impl FineGrainedTree {
    pub fn new(build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        let root = FineNodeData {
            parent: None,
            frame: crate::shared::root_frame(),
            children: FxHashMap::default(),
            total_samples: 0,
            self_samples: 0,
            counters: PerProcessCounters::default(),
        };
        Self {
            nodes: RwLock::new(vec![Arc::new(Mutex::new(root))]),
            build_mode,
            sample_mode,
            process_count: AtomicUsize::new(0),
        }
    }

    fn node_arc(&self, id: NodeId) -> Arc<Mutex<FineNodeData>> {
        self.nodes.read()[id as usize].clone()
    }

    fn push_node(&self, data: FineNodeData) -> NodeId {
        let mut nodes = self.nodes.write();
        let id = nodes.len() as NodeId;
        nodes.push(Arc::new(Mutex::new(data)));
        id
    }

    /// Locks `parent`, finds or creates its child for `key`. Never holds
    /// more than `parent`'s own mutex at once; `push_node` takes the
    /// table-wide `RwLock` only while `parent`'s mutex is already held,
    /// and no other code path acquires a node mutex while holding that
    /// `RwLock`, so the two can never form a cycle.
    fn child_or_insert(&self, parent: NodeId, key: FrameKey, frame: &ResolvedFrame) -> NodeId {
        let parent_arc = self.node_arc(parent);
        let mut guard = parent_arc.lock();
        if let Some(&existing) = guard.children.get(&key) {
            return existing;
        }
        let id = self.push_node(FineNodeData {
            parent: Some(parent),
            frame: frame.clone(),
            children: FxHashMap::default(),
            total_samples: 0,
            self_samples: 0,
            counters: PerProcessCounters::default(),
        });
        guard.children.insert(key, id);
        id
    }

    pub fn insert(&self, frames: &[ResolvedFrame], process_id: usize, count: u64, time: f64) {
        self.process_count.fetch_max(process_id + 1, Ordering::Relaxed);
        let credit_every_node = self.sample_mode.credits_every_node();
        let credit_self_samples = self.sample_mode.credits_self_samples();

        {
            let root = self.node_arc(ROOT);
            let mut guard = root.lock();
            guard.total_samples += count;
            guard.counters.add(process_id, count, time);
        }

        let mut current = ROOT;
        for frame in frames {
            let key = FrameKey::new(frame, self.build_mode);
            let child = self.child_or_insert(current, key, frame);
            {
                let node = self.node_arc(child);
                let mut guard = node.lock();
                guard.total_samples += count;
                if credit_every_node {
                    guard.counters.add(process_id, count, time);
                }
            }
            current = child;
        }

        if credit_self_samples {
            let leaf = self.node_arc(current);
            let mut guard = leaf.lock();
            guard.self_samples += count;
            if self.sample_mode == SampleCountMode::Exclusive && current != ROOT {
                guard.counters.add(process_id, count, time);
            }
        }
    }

    pub fn process_count(&self) -> usize {
        self.process_count.load(Ordering::Relaxed)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn total_samples(&self, id: NodeId) -> u64 {
        self.node_arc(id).lock().total_samples
    }

    pub fn sampling_count(&self, id: NodeId, process_id: usize) -> u64 {
        self.node_arc(id)
            .lock()
            .counters
            .sampling_counts
            .get(process_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn child_of(&self, parent: NodeId, key: &FrameKey) -> Option<NodeId> {
        self.node_arc(parent).lock().children.get(key).copied()
    }

    /// Converts this tree into a plain [`crate::arena::TreeArena`] for
    /// traversal, serialization and analysis, which all assume
    /// single-threaded, already-settled data.
    pub fn into_arena(self) -> crate::arena::TreeArena {
        let nodes = self.nodes.into_inner();
        let mut arena = crate::arena::TreeArena::new(self.build_mode, self.sample_mode);
        for (id, node) in nodes.iter().enumerate() {
            let data = node.lock();
            arena.adopt_node(
                id as NodeId,
                data.parent,
                data.frame.clone(),
                data.total_samples,
                data.self_samples,
                data.counters.clone(),
            );
        }
        arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

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
    fn concurrent_inserts_on_shared_paths_are_accounted_for() {
        let tree = StdArc::new(FineGrainedTree::new(
            BuildMode::ContextFree,
            SampleCountMode::Inclusive,
        ));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let tree = tree.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        tree.insert(&[frame("main"), frame("work")], 0, 1, 1.0);
                    }
                });
            }
        });
        assert_eq!(tree.total_samples(ROOT), 1600);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn distinct_process_ids_tracked_independently() {
        let tree = FineGrainedTree::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        tree.insert(&[frame("main")], 0, 1, 1.0);
        tree.insert(&[frame("main")], 1, 1, 1.0);
        assert_eq!(tree.process_count(), 2);
    }

    #[test]
    fn exclusive_mode_credits_self_samples_on_leaf_only() {
        let tree = FineGrainedTree::new(BuildMode::ContextFree, SampleCountMode::Exclusive);
        tree.insert(&[frame("main"), frame("work")], 0, 1, 1.0);
        let arena = tree.into_arena();
        let main_id = arena.node(crate::arena::ROOT).children.values().next().copied().unwrap();
        let leaf_id = arena.node(main_id).children.values().next().copied().unwrap();
        assert_eq!(arena.node(main_id).self_samples, 0);
        assert_eq!(arena.node(leaf_id).self_samples, 1);
    }
}
