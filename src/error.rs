//! Error kinds (spec §7), and the exit-code mapping that makes them
//! visible to a caller of this binary (spec §6 "Exit codes").

use std::process::ExitCode;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PflowError {
    /// Invalid options or missing inputs; sampling or ingestion never
    /// starts (spec §7 `ConfigurationError`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timer, signal, or unwinder unavailable (spec §7
    /// `InitializationError`).
    #[error("initialization error: {0}")]
    Initialization(#[from] pflow_sampler::SamplerError),

    /// File magic, version, or length mismatch on a single input file
    /// (spec §7 `FormatError`).
    #[error("format error: {0}")]
    Format(#[from] pflow_codec::CodecError),

    /// Same `FormatError` class (spec §7), for the `.ptree`/`.ptree.gz`
    /// reader's own magic/version/length checks rather than `pflow-codec`'s.
    #[error("format error: {0}")]
    Ptree(#[from] crate::ptree::PtreeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether a run completed without any per-file failures, with some, or
/// not at all; drives the exit-code mapping below (spec §6: "0 success, 1
/// configuration error, 2 I/O error, 3 format error, 4 partial success").
pub enum RunOutcome {
    Success,
    PartialSuccess,
    Failed(PflowError),
}

impl RunOutcome {
    pub fn into_exit_code(self) -> ExitCode {
        match self {
            RunOutcome::Success => ExitCode::from(0),
            RunOutcome::PartialSuccess => ExitCode::from(4),
            RunOutcome::Failed(PflowError::Configuration(_)) => ExitCode::from(1),
            RunOutcome::Failed(PflowError::Io(_)) => ExitCode::from(2),
            RunOutcome::Failed(PflowError::Format(_)) => ExitCode::from(3),
            RunOutcome::Failed(PflowError::Ptree(_)) => ExitCode::from(3),
            RunOutcome::Failed(PflowError::Initialization(_)) => ExitCode::from(1),
        }
    }
}
