//! Ordered library-map snapshots (spec component C2): a finite, sorted set
//! of loaded-module ranges `[base, end) -> (path, file_offset)`, with point
//! lookup by binary search, grounded on the binary-search lookup in
//! `fxprof-processed-profile::lib_ranges::LibRanges` and the `/proc/*/maps`
//! parser in `samply::linux::proc_maps`.

mod coordinator;
mod proc_maps;

pub use coordinator::RefreshCoordinator;
pub use proc_maps::{parse_proc_maps, regions_to_entries, MappedRegion};
#[cfg(target_os = "linux")]
pub use proc_maps::ProcSelfMapsScanner;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// One disjoint, file-backed address range within a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryMapEntry {
    pub base: u64,
    pub end: u64,
    pub path: String,
    pub file_offset: u64,
}

#[derive(Debug, Error)]
pub enum LibraryMapError {
    #[error("library map entries overlap: [{0:#x}, {1:#x}) and [{2:#x}, {3:#x})")]
    OverlappingEntries(u64, u64, u64, u64),
    #[error("library map entries are not sorted by base address")]
    NotSorted,
}

/// A point-in-time record of which libraries are mapped where in a
/// process's address space (spec §3 "Library map"). Identified by a
/// process-unique, monotonically assigned 32-bit id.
#[derive(Debug, Clone)]
pub struct LibraryMap {
    id: u32,
    entries: Vec<LibraryMapEntry>,
}

impl LibraryMap {
    /// `entries` must already be sorted by `base` and non-overlapping
    /// (spec §3 invariant). This is checked, not silently repaired: a
    /// violation here means the module scanner handed back a broken
    /// inventory, which is a configuration/environment error, not
    /// something to paper over.
    pub fn new(id: u32, entries: Vec<LibraryMapEntry>) -> Result<Self, LibraryMapError> {
        for pair in entries.windows(2) {
            let [a, b] = pair else { unreachable!() };
            if a.base > b.base {
                return Err(LibraryMapError::NotSorted);
            }
            if a.end > b.base {
                return Err(LibraryMapError::OverlappingEntries(a.base, a.end, b.base, b.end));
            }
        }
        Ok(Self { id, entries })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn entries(&self) -> &[LibraryMapEntry] {
        &self.entries
    }

    /// Binary search on `base`; an entry qualifies iff `base <= address <
    /// end`. Returns the file-relative offset: `offset_in_file = (address -
    /// base) + file_offset` (spec §4.2).
    pub fn resolve(&self, address: u64) -> Option<(&str, u64)> {
        let index = match self.entries.binary_search_by_key(&address, |e| e.base) {
            Ok(exact) => exact,
            Err(0) => return None,
            Err(insertion_index) => insertion_index - 1,
        };
        let entry = &self.entries[index];
        if address < entry.end {
            Some((&entry.path, (address - entry.base) + entry.file_offset))
        } else {
            None
        }
    }
}

/// Scans the current inventory of loaded modules. Implementations must not
/// be called from a signal handler (spec §4.2, §4.3): they allocate and may
/// perform I/O (e.g. reading `/proc/self/maps`).
pub trait ModuleScanner {
    fn scan(&self) -> Vec<LibraryMapEntry>;
}

/// Keeps every snapshot captured so far, available by id, for the lifetime
/// of the process (spec §3: "old snapshots are retained in memory until
/// export"). Snapshot ids are assigned in increasing order starting at 0.
#[derive(Default)]
pub struct LibraryMapRegistry {
    next_id: AtomicU32,
    snapshots: Vec<Arc<LibraryMap>>,
}

impl LibraryMapRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(0),
            snapshots: Vec::new(),
        }
    }

    /// Re-scans modules via `scanner` and stores a freshly-identified
    /// snapshot. Must not be called from a signal handler. Returns the new
    /// snapshot's id.
    pub fn capture(&mut self, scanner: &dyn ModuleScanner) -> Result<u32, LibraryMapError> {
        let mut entries = scanner.scan();
        entries.sort_by_key(|e| e.base);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = LibraryMap::new(id, entries)?;
        self.snapshots.push(Arc::new(snapshot));
        Ok(id)
    }

    /// Registers an already-captured snapshot (e.g. one decoded from a
    /// `.libmap` file by `pflow-codec`) under the id it already carries,
    /// rather than assigning a fresh one via [`Self::capture`]. Advances
    /// `next_id` past it so a later `capture` on the same registry can
    /// never collide with a loaded id (spec §4.8 step 1: "load the libmap
    /// under a well-defined snapshot-id assignment").
    pub fn load(&mut self, snapshot: LibraryMap) -> u32 {
        let id = snapshot.id();
        self.next_id.fetch_max(id.wrapping_add(1), Ordering::Relaxed);
        self.snapshots.push(Arc::new(snapshot));
        id
    }

    pub fn get(&self, id: u32) -> Option<Arc<LibraryMap>> {
        self.snapshots.iter().find(|s| s.id() == id).cloned()
    }

    pub fn snapshots(&self) -> &[Arc<LibraryMap>] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<Arc<LibraryMap>> {
        self.snapshots.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: u64, end: u64, path: &str, file_offset: u64) -> LibraryMapEntry {
        LibraryMapEntry {
            base,
            end,
            path: path.to_string(),
            file_offset,
        }
    }

    #[test]
    fn resolve_finds_containing_entry() {
        let map = LibraryMap::new(
            0,
            vec![
                entry(0x1000, 0x2000, "app", 0),
                entry(0x2000, 0x3000, "libc.so", 0x500),
            ],
        )
        .unwrap();
        assert_eq!(map.resolve(0x1123), Some(("app", 0x123)));
        assert_eq!(map.resolve(0x2010), Some(("libc.so", 0x510)));
        assert_eq!(map.resolve(0x500), None);
        assert_eq!(map.resolve(0x3000), None);
    }

    #[test]
    fn overlapping_entries_are_rejected() {
        let result = LibraryMap::new(
            0,
            vec![entry(0, 0x2000, "a", 0), entry(0x1000, 0x3000, "b", 0)],
        );
        assert!(result.is_err());
    }

    struct FixedScanner(Vec<LibraryMapEntry>);
    impl ModuleScanner for FixedScanner {
        fn scan(&self) -> Vec<LibraryMapEntry> {
            self.0.clone()
        }
    }

    #[test]
    fn load_preserves_the_snapshots_own_id_and_protects_future_captures() {
        let mut registry = LibraryMapRegistry::new();
        let loaded = LibraryMap::new(5, vec![entry(0x1000, 0x2000, "app", 0)]).unwrap();
        assert_eq!(registry.load(loaded), 5);
        assert!(registry.get(5).is_some());

        let scanner = FixedScanner(vec![entry(0x1000, 0x2000, "app", 0)]);
        let captured_id = registry.capture(&scanner).unwrap();
        assert!(captured_id > 5);
    }

    #[test]
    fn registry_assigns_increasing_ids_and_retains_history() {
        let mut registry = LibraryMapRegistry::new();
        let scanner = FixedScanner(vec![entry(0x1000, 0x2000, "app", 0)]);
        let id0 = registry.capture(&scanner).unwrap();
        let id1 = registry.capture(&scanner).unwrap();
        assert!(id1 > id0);
        assert!(registry.get(id0).is_some());
        assert!(registry.get(id1).is_some());
        assert_eq!(registry.snapshots().len(), 2);
    }
}
