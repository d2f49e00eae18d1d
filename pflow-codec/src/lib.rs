//! Export/import codec for sample-store (`.pflw`) and library-map
//! (`.libmap`) dumps (spec component C4). Headers are fixed-size and
//! little-endian, following the Firefox Profiler JSON writer's preference
//! for explicit, versioned framing (`fxprof-processed-profile`) adapted
//! here to a compact binary format since these files are written from a
//! process that is about to exit and must not do JSON-level work.

mod libmap_file;
mod sample_file;

pub use libmap_file::{export_libmap, import_libmap};
pub use sample_file::{export_samples, import_samples};

use thiserror::Error;

pub const FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic number: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported format version {0} (this build supports {FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("file is truncated: expected at least {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("header is internally inconsistent: {0}")]
    InconsistentHeader(&'static str),

    #[error("library map snapshot is invalid: {0}")]
    LibraryMap(#[from] pflow_libmap::LibraryMapError),

    #[error("call stack exceeds maximum depth: {0}")]
    DepthExceeded(#[from] pflow_store::DepthExceeded),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Writes `contents` to `path` atomically: the payload is written to a
/// temporary file in the same directory, fsynced, then renamed into place
/// (spec §4.4 "Export is atomic-on-close").
pub(crate) fn write_atomically(
    path: &std::path::Path,
    write: impl FnOnce(&mut std::fs::File) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let mut temp = tempfile::Builder::new().tempfile_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
