//! Offset conversion (C6) and hierarchical performance-tree aggregation
//! (C7): joins resolved call stacks from `pflow-libmap`/`pflow-symbols`
//! into a rooted tree, under a choice of build mode, sample-count mode,
//! and concurrency model. Grounded throughout on
//! `fxprof_processed_profile::stack_table`/`frame_table` and
//! `samply-in-process::shared::stack_converter`.

mod analyzers;
mod arena;
mod coarse;
mod converter;
mod dot;
mod fine_grained;
mod lock_free;
mod shared;
mod thread_local;
mod traversal;
mod tree;

pub use analyzers::{balance, hotspots, Balance, HotspotEntry, HotspotMetric};
pub use arena::{ArenaNode, NodeId, TreeArena, ROOT};
pub use converter::OffsetConverter;
pub use dot::{to_dot, ColorScheme};
pub use shared::{
    BuildMode, FrameKey, PerProcessCounters, ResolvedFrame, SampleCountMode, UNKNOWN_LIBRARY,
    UNRESOLVED_LIBRARY,
};
pub use thread_local::{merge_all, ThreadLocalTree};
pub use traversal::{breadth_first, post_order, pre_order, Visitor};
pub use tree::{ConcurrencyModel, PerformanceTree};
