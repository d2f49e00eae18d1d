//! Offset conversion (spec component C6): turns a raw address stack plus a
//! snapshot id into a sequence of [`ResolvedFrame`]s, consulting a
//! [`LibraryMapRegistry`] for the address-to-(library, offset) step and,
//! optionally, a [`SymbolResolver`] for the offset-to-(function, file,
//! line) step. Grounded on `samply-in-process::shared::stack_converter`,
//! which performs the analogous raw-address-to-resolved-frame conversion
//! against a `LibMappingInfo` table.

use pflow_libmap::LibraryMapRegistry;
use pflow_symbols::SymbolResolver;

use crate::shared::ResolvedFrame;

/// Converts raw address stacks into resolved frames. Carries no per-sample
/// state; a single instance is shared across every worker ingesting
/// samples (spec §4.6).
pub struct OffsetConverter<'a> {
    libmap: &'a LibraryMapRegistry,
    symbols: Option<&'a SymbolResolver>,
}

impl<'a> OffsetConverter<'a> {
    pub fn new(libmap: &'a LibraryMapRegistry, symbols: Option<&'a SymbolResolver>) -> Self {
        Self { libmap, symbols }
    }

    /// Resolves one address against the library map snapshot identified by
    /// `snapshot_id`.
    ///
    /// - No snapshot with that id exists: `[unknown]` (spec §4.6 case 1).
    /// - The snapshot exists but no entry covers the address: `[unresolved]`
    ///   (spec §4.6 case 2).
    /// - Otherwise the library and file offset are known; if a symbol
    ///   resolver is configured its answer (possibly still empty) fills in
    ///   `function`/`file`/`line`.
    pub fn resolve_one(&self, raw_address: u64, snapshot_id: u32) -> ResolvedFrame {
        let Some(snapshot) = self.libmap.get(snapshot_id) else {
            return ResolvedFrame::unknown(raw_address);
        };
        let Some((library, offset)) = snapshot.resolve(raw_address) else {
            return ResolvedFrame::unresolved(raw_address);
        };

        let mut frame = ResolvedFrame {
            raw_address,
            library: library.to_string(),
            offset,
            function: None,
            file: None,
            line: None,
        };
        if let Some(resolver) = self.symbols {
            let info = resolver.resolve(&frame.library, offset);
            frame.function = info.function;
            frame.file = info.file;
            frame.line = info.line;
        }
        frame
    }

    /// Resolves an entire stack, root-to-leaf order preserved as given.
    pub fn resolve_stack(&self, addresses: &[u64], snapshot_id: u32) -> Vec<ResolvedFrame> {
        addresses
            .iter()
            .map(|&addr| self.resolve_one(addr, snapshot_id))
            .collect()
    }
}
