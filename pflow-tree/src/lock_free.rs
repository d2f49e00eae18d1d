//! `LockFreeTree`: per-node counters are plain atomics updated with no
//! lock on the steady-state path; a narrow mutex guards only structural
//! mutation — creating a new child, or growing a node's per-process
//! counter vectors past their current capacity (spec §4.7 "LockFree").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::arena::NodeId;
use crate::shared::{BuildMode, FrameKey, PerProcessCounters, ResolvedFrame, SampleCountMode};

pub const ROOT: NodeId = 0;

/// Per-process counters where growth (extending the vectors) is guarded by
/// a lock but a read-sized increment is a single atomic add.
#[derive(Default)]
struct AtomicCounters {
    counts: RwLock<Vec<AtomicU64>>,
    // f64 bits, updated via compare_exchange loop.
    times_bits: RwLock<Vec<AtomicU64>>,
}

impl AtomicCounters {
    fn add(&self, process_id: usize, count: u64, time: f64) {
        if count != 0 {
            if let Some(slot) = self.counts.read().get(process_id) {
                slot.fetch_add(count, Ordering::Relaxed);
            } else {
                let mut counts = self.counts.write();
                if counts.len() <= process_id {
                    counts.resize_with(process_id + 1, || AtomicU64::new(0));
                }
                counts[process_id].fetch_add(count, Ordering::Relaxed);
            }
        }
        if time != 0.0 {
            if let Some(slot) = self.times_bits.read().get(process_id) {
                add_f64_bits(slot, time);
            } else {
                let mut times = self.times_bits.write();
                if times.len() <= process_id {
                    times.resize_with(process_id + 1, || AtomicU64::new(0));
                }
                add_f64_bits(&times[process_id], time);
            }
        }
    }

    fn snapshot(&self) -> PerProcessCounters {
        let sampling_counts = self
            .counts
            .read()
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .collect();
        let execution_times = self
            .times_bits
            .read()
            .iter()
            .map(|a| f64::from_bits(a.load(Ordering::Relaxed)))
            .collect();
        PerProcessCounters {
            sampling_counts,
            execution_times,
        }
    }
}

fn add_f64_bits(slot: &AtomicU64, delta: f64) {
    let mut current = slot.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

struct LockFreeNode {
    parent: Option<NodeId>,
    frame: ResolvedFrame,
    children: Mutex<FxHashMap<FrameKey, NodeId>>,
    total_samples: AtomicU64,
    self_samples: AtomicU64,
    counters: AtomicCounters,
}

pub struct LockFreeTree {
    nodes: RwLock<Vec<Arc<LockFreeNode>>>,
    build_mode: BuildMode,
    sample_mode: SampleCountMode,
    process_count: AtomicUsize,
}

impl LockFreeTree {
    pub fn new(build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        let root = LockFreeNode {
            parent: None,
            frame: crate::shared::root_frame(),
            children: Mutex::new(FxHashMap::default()),
            total_samples: AtomicU64::new(0),
            self_samples: AtomicU64::new(0),
            counters: AtomicCounters::default(),
        };
        Self {
            nodes: RwLock::new(vec![Arc::new(root)]),
            build_mode,
            sample_mode,
            process_count: AtomicUsize::new(0),
        }
    }

    fn node_arc(&self, id: NodeId) -> Arc<LockFreeNode> {
        self.nodes.read()[id as usize].clone()
    }

    fn push_node(&self, node: LockFreeNode) -> NodeId {
        let mut nodes = self.nodes.write();
        let id = nodes.len() as NodeId;
        nodes.push(Arc::new(node));
        id
    }

    /// The only lock taken here is `parent`'s own `children` mutex (plus,
    /// on a miss, the table-wide `RwLock` to append — acquired only while
    /// already holding `parent`'s mutex, never the reverse), so two
    /// distinct parents can be extended fully in parallel.
    fn child_or_insert(&self, parent: NodeId, key: FrameKey, frame: &ResolvedFrame) -> NodeId {
        let parent_arc = self.node_arc(parent);
        let mut children = parent_arc.children.lock();
        if let Some(&existing) = children.get(&key) {
            return existing;
        }
        let id = self.push_node(LockFreeNode {
            parent: Some(parent),
            frame: frame.clone(),
            children: Mutex::new(FxHashMap::default()),
            total_samples: AtomicU64::new(0),
            self_samples: AtomicU64::new(0),
            counters: AtomicCounters::default(),
        });
        children.insert(key, id);
        id
    }

    pub fn insert(&self, frames: &[ResolvedFrame], process_id: usize, count: u64, time: f64) {
        self.process_count.fetch_max(process_id + 1, Ordering::Relaxed);
        let credit_every_node = self.sample_mode.credits_every_node();
        let credit_self_samples = self.sample_mode.credits_self_samples();

        let root = self.node_arc(ROOT);
        root.total_samples.fetch_add(count, Ordering::Relaxed);
        root.counters.add(process_id, count, time);

        let mut current = ROOT;
        let mut current_arc = root;
        for frame in frames {
            let key = FrameKey::new(frame, self.build_mode);
            let child_id = self.child_or_insert(current, key, frame);
            let child = self.node_arc(child_id);
            child.total_samples.fetch_add(count, Ordering::Relaxed);
            if credit_every_node {
                child.counters.add(process_id, count, time);
            }
            current = child_id;
            current_arc = child;
        }

        if credit_self_samples {
            current_arc.self_samples.fetch_add(count, Ordering::Relaxed);
            if self.sample_mode == SampleCountMode::Exclusive && current != ROOT {
                current_arc.counters.add(process_id, count, time);
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
        self.node_arc(id).total_samples.load(Ordering::Relaxed)
    }

    pub fn into_arena(self) -> crate::arena::TreeArena {
        let nodes = self.nodes.into_inner();
        let mut arena = crate::arena::TreeArena::new(self.build_mode, self.sample_mode);
        for (id, node) in nodes.iter().enumerate() {
            arena.adopt_node(
                id as NodeId,
                node.parent,
                node.frame.clone(),
                node.total_samples.load(Ordering::Relaxed),
                node.self_samples.load(Ordering::Relaxed),
                node.counters.snapshot(),
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
    fn concurrent_inserts_converge_to_correct_totals() {
        let tree = StdArc::new(LockFreeTree::new(
            BuildMode::ContextFree,
            SampleCountMode::Inclusive,
        ));
        std::thread::scope(|scope| {
            for _ in 0..16 {
                let tree = tree.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        tree.insert(&[frame("main"), frame("work")], 0, 1, 1.0);
                    }
                });
            }
        });
        assert_eq!(tree.total_samples(ROOT), 8000);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn f64_bit_accumulation_is_lossless_under_contention() {
        let tree = StdArc::new(LockFreeTree::new(
            BuildMode::ContextFree,
            SampleCountMode::Inclusive,
        ));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let tree = tree.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        tree.insert(&[frame("main")], 0, 0, 0.5);
                    }
                });
            }
        });
        let arena = StdArc::try_unwrap(tree).unwrap_or_else(|_| panic!()).into_arena();
        let main_id = arena
            .node(crate::arena::ROOT)
            .children
            .values()
            .next()
            .copied()
            .unwrap();
        assert!((arena.node(main_id).counters.execution_times[0] - 400.0).abs() < 1e-6);
    }
}
