//! Builder-local error kinds. Format/IO problems during ingestion are
//! collected per file rather than aborting the whole run (spec §7
//! `FormatError`: "skip the offending file, record in ingestion summary,
//! continue").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read sample file: {0}")]
    Codec(#[from] pflow_codec::CodecError),

    /// A stack in this file exceeded the configured `MaxStackDepth` (spec
    /// §6), distinct from `pflow_store::MAX_STACK_DEPTH`'s hard ceiling.
    #[error("stack depth {depth} exceeds the configured maximum of {limit}")]
    DepthExceeded { depth: usize, limit: usize },

    #[error("ingestion was cancelled")]
    Cancelled,
}
