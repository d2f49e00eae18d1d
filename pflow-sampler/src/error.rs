//! Error semantics (spec §4.3): initialization failures are fatal, but a
//! dropped sample during steady-state running is best-effort and must
//! never abort the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    /// The sampler could not install its signal handler or arm its timer.
    /// Fatal: the caller should surface this and exit rather than run with
    /// a half-initialized sampler.
    #[error("sampler initialization failed: {0}")]
    InitFailed(String),

    /// The sampler was asked to start twice, or to stop/configure while
    /// not running, per the `stopped|armed|running` state machine.
    #[error("sampler is in state {current:?}, which does not allow {attempted}")]
    InvalidTransition { current: crate::sampler::SamplerState, attempted: &'static str },

    /// The sampler's background thread (or the process itself) was torn
    /// down before an explicit `stop` — callers should treat stack traces
    /// captured up to this point as the final result, not as a partial
    /// failure.
    #[error("sampler was dropped without an explicit stop")]
    Dropped,
}
