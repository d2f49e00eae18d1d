use serde::Serialize;

/// Whether two call sites that invoke the same function collapse into one
/// tree node or stay distinct (spec §4.7 "Build modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    ContextFree,
    ContextAware,
}

/// Which nodes on an inserted path receive the sample (spec §4.7
/// "Sample-count modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleCountMode {
    #[default]
    Exclusive,
    Inclusive,
    Both,
}

impl SampleCountMode {
    pub(crate) fn credits_self_samples(self) -> bool {
        matches!(self, SampleCountMode::Exclusive | SampleCountMode::Both)
    }

    pub(crate) fn credits_every_node(self) -> bool {
        matches!(self, SampleCountMode::Inclusive | SampleCountMode::Both)
    }
}

/// One resolved stack frame (spec §3 "Resolved frame"). `library` is either
/// an actual path, or one of the two sentinels `"[unknown]"` (no snapshot
/// covers the address) or `"[unresolved]"` (the snapshot has no mapping
/// for this address) produced by the offset converter (spec §4.6).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedFrame {
    pub raw_address: u64,
    pub library: String,
    pub offset: u64,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

pub const UNKNOWN_LIBRARY: &str = "[unknown]";
pub const UNRESOLVED_LIBRARY: &str = "[unresolved]";

impl ResolvedFrame {
    pub fn unknown(raw_address: u64) -> Self {
        Self {
            raw_address,
            library: UNKNOWN_LIBRARY.to_string(),
            offset: raw_address,
            function: None,
            file: None,
            line: None,
        }
    }

    pub fn unresolved(raw_address: u64) -> Self {
        Self {
            raw_address,
            library: UNRESOLVED_LIBRARY.to_string(),
            offset: raw_address,
            function: None,
            file: None,
            line: None,
        }
    }

    /// The name used for node display and, under `ContextFree`, identity:
    /// the resolved function name if known, otherwise the raw address
    /// formatted as a hex literal (mirrors
    /// `fxprof_processed_profile::frame_table`'s fallback of formatting an
    /// unresolved address as the frame's display string).
    pub fn display_name(&self) -> String {
        match &self.function {
            Some(name) => name.clone(),
            None => format!("0x{:x}", self.raw_address),
        }
    }
}

/// Identity key that determines whether two candidate children are "the
/// same" node (spec §3 "Tree invariants", P3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKey {
    ContextFree { function: String, library: String },
    ContextAware { function: String, library: String, offset: u64 },
}

impl FrameKey {
    pub fn new(frame: &ResolvedFrame, mode: BuildMode) -> Self {
        let function = frame.display_name();
        let library = frame.library.clone();
        match mode {
            BuildMode::ContextFree => FrameKey::ContextFree { function, library },
            BuildMode::ContextAware => FrameKey::ContextAware {
                function,
                library,
                offset: frame.offset,
            },
        }
    }
}

pub const ROOT_FUNCTION: &str = "[root]";
pub const ROOT_LIBRARY: &str = "[virtual]";

pub fn root_frame() -> ResolvedFrame {
    ResolvedFrame {
        raw_address: 0,
        library: ROOT_LIBRARY.to_string(),
        offset: 0,
        function: Some(ROOT_FUNCTION.to_string()),
        file: None,
        line: None,
    }
}

/// Per-process counters that grow lazily as higher process ids are
/// observed, rather than requiring every node in the tree to be visited
/// eagerly whenever `process_count` increases (spec §4.7 step 1). Reads
/// that need a uniform length across every node (export, analyzers) pad
/// with zeros out to the tree's current `process_count` at read time.
#[derive(Debug, Clone, Default)]
pub struct PerProcessCounters {
    pub sampling_counts: Vec<u64>,
    pub execution_times: Vec<f64>,
}

impl PerProcessCounters {
    pub fn add(&mut self, process_id: usize, count: u64, time: f64) {
        if self.sampling_counts.len() <= process_id {
            self.sampling_counts.resize(process_id + 1, 0);
        }
        if self.execution_times.len() <= process_id {
            self.execution_times.resize(process_id + 1, 0.0);
        }
        self.sampling_counts[process_id] += count;
        self.execution_times[process_id] += time;
    }

    pub fn padded_counts(&self, process_count: usize) -> Vec<u64> {
        let mut v = self.sampling_counts.clone();
        v.resize(process_count, 0);
        v
    }

    pub fn padded_times(&self, process_count: usize) -> Vec<f64> {
        let mut v = self.execution_times.clone();
        v.resize(process_count, 0.0);
        v
    }
}
