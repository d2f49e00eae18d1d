//! `TreeArena`: a plain, single-threaded tree backing store, used directly
//! by [`crate::coarse::CoarseLockTree`] (behind a mutex) and by
//! [`crate::thread_local::ThreadLocalTree`] (one per worker, then merged).
//! Grounded on `fxprof_processed_profile::stack_table::StackTable`, which
//! stores call-tree nodes in a flat `Vec` indexed by a `StackIndex` and
//! looks up children through a small per-node map keyed by frame identity.

use rustc_hash::FxHashMap;

use crate::shared::{BuildMode, FrameKey, PerProcessCounters, ResolvedFrame, SampleCountMode};

pub type NodeId = u32;

#[derive(Debug, Clone)]
pub struct ArenaNode {
    pub parent: Option<NodeId>,
    pub frame: ResolvedFrame,
    pub children: FxHashMap<FrameKey, NodeId>,
    pub total_samples: u64,
    pub self_samples: u64,
    pub counters: PerProcessCounters,
}

impl ArenaNode {
    fn new(parent: Option<NodeId>, frame: ResolvedFrame) -> Self {
        Self {
            parent,
            frame,
            children: FxHashMap::default(),
            total_samples: 0,
            self_samples: 0,
            counters: PerProcessCounters::default(),
        }
    }

    /// The edge weight of `parent -> self` equals `total_samples`: since
    /// this is a tree (each node has exactly one parent), every path that
    /// reaches this node passes through that single edge, so the edge's
    /// traversal count and the node's total sample count coincide.
    pub fn edge_weight(&self) -> u64 {
        self.total_samples
    }
}

/// A single-threaded call tree: a root plus nodes reachable from it,
/// addressed by [`NodeId`] (spec §3 "Tree invariants").
pub struct TreeArena {
    nodes: Vec<ArenaNode>,
    build_mode: BuildMode,
    sample_mode: SampleCountMode,
    process_count: usize,
}

pub const ROOT: NodeId = 0;

impl TreeArena {
    pub fn new(build_mode: BuildMode, sample_mode: SampleCountMode) -> Self {
        Self {
            nodes: vec![ArenaNode::new(None, crate::shared::root_frame())],
            build_mode,
            sample_mode,
            process_count: 0,
        }
    }

    pub fn node(&self, id: NodeId) -> &ArenaNode {
        &self.nodes[id as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn process_count(&self) -> usize {
        self.process_count
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    pub fn sample_mode(&self) -> SampleCountMode {
        self.sample_mode
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &ArenaNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (i as NodeId, n))
    }

    /// Merges `other` (a complete, independently-built tree, e.g. one
    /// worker's slice under `ThreadLocalMerge`) into `self`, matching nodes
    /// by frame key along each root-to-node path and summing their
    /// counters. Merge is commutative and associative: the result does not
    /// depend on the order in which per-worker trees are folded in (spec
    /// §4.7 "ThreadLocalMerge").
    pub fn merge_from(&mut self, other: &TreeArena) {
        // old node id in `other` -> new node id in `self`.
        let mut mapped: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        mapped.insert(ROOT, ROOT);

        self.nodes[ROOT as usize].total_samples += other.nodes[ROOT as usize].total_samples;
        self.nodes[ROOT as usize].self_samples += other.nodes[ROOT as usize].self_samples;
        merge_counters(&mut self.nodes[ROOT as usize].counters, &other.nodes[ROOT as usize].counters);

        let mut queue: Vec<NodeId> = vec![ROOT];
        while let Some(old_id) = queue.pop() {
            let new_parent = mapped[&old_id];
            for (key, &old_child) in &other.nodes[old_id as usize].children {
                let new_child = self.child_or_insert(
                    new_parent,
                    key.clone(),
                    other.nodes[old_child as usize].frame.clone(),
                );
                self.nodes[new_child as usize].total_samples +=
                    other.nodes[old_child as usize].total_samples;
                self.nodes[new_child as usize].self_samples +=
                    other.nodes[old_child as usize].self_samples;
                merge_counters(
                    &mut self.nodes[new_child as usize].counters,
                    &other.nodes[old_child as usize].counters,
                );
                mapped.insert(old_child, new_child);
                queue.push(old_child);
            }
        }

        if other.process_count > self.process_count {
            self.process_count = other.process_count;
        }
    }

    /// Rebuilds one node coming from a settled, concurrency-backend-specific
    /// tree (e.g. [`crate::fine_grained::FineGrainedTree`] or
    /// [`crate::lock_free::LockFreeTree`]) into this arena. Nodes must be
    /// adopted in increasing id order starting from `ROOT` so each child's
    /// parent is already present.
    #[allow(clippy::too_many_arguments)]
    pub fn adopt_node(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        frame: ResolvedFrame,
        total_samples: u64,
        self_samples: u64,
        counters: PerProcessCounters,
    ) {
        let process_len = counters
            .sampling_counts
            .len()
            .max(counters.execution_times.len());
        if process_len > self.process_count {
            self.process_count = process_len;
        }

        if id == ROOT {
            self.nodes[ROOT as usize].total_samples = total_samples;
            self.nodes[ROOT as usize].self_samples = self_samples;
            self.nodes[ROOT as usize].counters = counters;
            return;
        }

        debug_assert_eq!(id as usize, self.nodes.len(), "nodes must be adopted in id order");
        let key = FrameKey::new(&frame, self.build_mode);
        self.nodes.push(ArenaNode {
            parent,
            frame,
            children: FxHashMap::default(),
            total_samples,
            self_samples,
            counters,
        });
        if let Some(p) = parent {
            self.nodes[p as usize].children.insert(key, id);
        }
    }

    /// Finds or creates the child of `parent` identified by `key`, creating
    /// it with `frame` if absent (spec §3 "two siblings must differ" rule).
    fn child_or_insert(&mut self, parent: NodeId, key: FrameKey, frame: ResolvedFrame) -> NodeId {
        if let Some(&existing) = self.nodes[parent as usize].children.get(&key) {
            return existing;
        }
        let id = self.nodes.len() as NodeId;
        self.nodes.push(ArenaNode::new(Some(parent), frame));
        self.nodes[parent as usize].children.insert(key, id);
        id
    }

    /// Inserts one sample: a resolved call stack, a process id, an
    /// execution-time weight (0.0 if the caller has no timing data), and a
    /// count of how many raw samples this insertion represents (almost
    /// always 1; >1 supports pre-aggregated input). Implements spec §4.7's
    /// insertion algorithm steps 1-4 exactly:
    ///
    /// 1. (process-count growth is handled lazily; see
    ///    [`crate::shared::PerProcessCounters`])
    /// 2. the root's `total_samples` and per-process counters are always
    ///    credited, regardless of mode;
    /// 3. walking root-to-leaf, every node's `total_samples` is
    ///    incremented, and per-process counters are additionally credited
    ///    under Inclusive/Both;
    /// 4. at the final node, `self_samples` is credited under
    ///    Exclusive/Both; under Exclusive the leaf's per-process counters
    ///    are credited too, *unless* the leaf is the root (an empty stack,
    ///    spec §8 boundary B1), since step 2 already credited the root
    ///    once and crediting it again here would double-count.
    pub fn insert(
        &mut self,
        frames: &[ResolvedFrame],
        process_id: usize,
        count: u64,
        time: f64,
    ) -> NodeId {
        if self.process_count <= process_id {
            self.process_count = process_id + 1;
        }

        let credit_every_node = self.sample_mode.credits_every_node();
        let credit_self_samples = self.sample_mode.credits_self_samples();

        self.nodes[ROOT as usize].total_samples += count;
        self.nodes[ROOT as usize]
            .counters
            .add(process_id, count, time);

        let mut current = ROOT;
        for frame in frames {
            let key = FrameKey::new(frame, self.build_mode);
            let child = self.child_or_insert(current, key, frame.clone());
            self.nodes[child as usize].total_samples += count;
            if credit_every_node {
                self.nodes[child as usize].counters.add(process_id, count, time);
            }
            current = child;
        }

        if credit_self_samples {
            self.nodes[current as usize].self_samples += count;
            if self.sample_mode == SampleCountMode::Exclusive && current != ROOT {
                self.nodes[current as usize].counters.add(process_id, count, time);
            }
        }

        current
    }
}

fn merge_counters(into: &mut PerProcessCounters, from: &PerProcessCounters) {
    for (i, &count) in from.sampling_counts.iter().enumerate() {
        if count != 0 {
            into.add(i, count, 0.0);
        }
    }
    for (i, &time) in from.execution_times.iter().enumerate() {
        if time != 0.0 {
            into.add(i, 0, time);
        }
    }
}
