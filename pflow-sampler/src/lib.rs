//! Signal-driven stack sampler (spec component C3): arms a `SIGPROF`
//! timer, unwinds the interrupted thread's stack inside the handler, and
//! routes it into `pflow-store`'s lock-free counter table, refreshing
//! `pflow-libmap` snapshots from a background thread when an address
//! falls outside the currently published one. Grounded on the
//! start/stop lifecycle of `samply-in-process::mac::profiler::Sampler`,
//! reimplemented around POSIX `sigaction`/`setitimer` rather than
//! Mach thread suspension, since that is the mechanism available on the
//! platforms this crate targets.

#[cfg(target_os = "linux")]
mod attach;
mod current_map;
mod error;
mod handler;
mod refresher;
mod sampler;
mod unwinder;

pub use current_map::CurrentMap;
pub use error::SamplerError;
pub use refresher::BackgroundRefresher;
pub use sampler::{Sampler, SamplerState};
pub use unwinder::{FramePointerUnwinder, NullUnwinder, StackUnwinder};
