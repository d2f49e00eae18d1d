//! Tree builder (spec component C8): coordinates C4 (codec) → C6 (offset
//! conversion) → C7 (performance tree) to turn a batch of
//! `(sample_file, libmap_file, process_id)` triples into one finished
//! [`pflow_tree::TreeArena`] plus an ingestion summary. Grounded on
//! `samply::shared::process_sample_data`'s per-process conversion loop and
//! `samply::linux_shared::converter`'s multi-process merge.

mod builder;
mod error;
mod job;
mod summary;

pub use builder::{IngestionPlan, TreeBuilder};
pub use error::BuildError;
pub use job::IngestJob;
pub use summary::{BuildSummary, IngestFailure};
