//! `(library, offset) -> (function, file, line)` resolution with strategy
//! selection and caching (spec component C5), grounded on
//! `samply-symbols`'s use of the `object` crate for reading binaries and on
//! `samply::symbols`'s pattern of wrapping a pluggable backend behind a
//! small config-driven strategy choice.

mod cache;
mod debug_strategy;
mod fast_strategy;
mod resolver;

pub use cache::{CacheStats, SymbolCache};
pub use debug_strategy::{DebugSymbolSource, ExternalToolSource};
pub use fast_strategy::{FastSymbolSource, ObjectDynsymSource};
pub use resolver::{SymbolResolver, SymbolResolverConfig};

/// `(function, file, line)`, any of which may be absent. An entirely empty
/// `SymbolInfo` is a normal, successful-but-unresolved result, not an error
/// (spec §4.5 "Failure semantics").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl SymbolInfo {
    pub fn is_empty(&self) -> bool {
        self.function.is_none() && self.file.is_none() && self.line.is_none()
    }

    pub fn function_only(name: impl Into<String>) -> Self {
        Self {
            function: Some(name.into()),
            file: None,
            line: None,
        }
    }

    pub fn full(function: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            function: Some(function.into()),
            file: Some(file.into()),
            line: Some(line),
        }
    }
}

/// Which backend(s) [`SymbolResolver::resolve`] consults (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolStrategy {
    /// Dynamic-symbol lookup only: function names, no file/line.
    FastOnly,
    /// Debug-info lookup via an external tool only: function, file, and
    /// line when available.
    DebugOnly,
    /// Try `FastOnly` first; on an empty result, fall back to `DebugOnly`.
    #[default]
    AutoFallback,
}
