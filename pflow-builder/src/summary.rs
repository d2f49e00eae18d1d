//! Ingestion outcome (spec §4.8 step 5: "expose the tree and summary
//! counters"), supplemented with a per-file failure list since the spec's
//! distilled `(ok_count, fail_list)` return (spec §7) is naturally
//! expressed as one struct alongside the counters.

use std::path::PathBuf;

use crate::error::BuildError;

/// One file pair the builder could not ingest, and why.
#[derive(Debug)]
pub struct IngestFailure {
    pub sample_path: PathBuf,
    pub error: BuildError,
}

/// Aggregate result of a [`crate::TreeBuilder::ingest_all`] run.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub files_ingested: usize,
    pub total_samples: u64,
    pub failures: Vec<IngestFailure>,
}

impl BuildSummary {
    pub fn files_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}
