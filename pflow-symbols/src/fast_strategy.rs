use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use object::{Object, ObjectSymbol};

/// Resolves `(library_path, offset) -> function name` using a runtime
/// dynamic-symbol table, without any debug info (spec §4.5 "FastOnly").
/// This requires the library to be readable from the analysis process; it
/// never yields file/line information.
pub trait FastSymbolSource: Send + Sync {
    fn lookup(&self, library_path: &str, offset: u64) -> Option<String>;
}

/// Reads the dynamic symbol table directly out of the ELF/Mach-O file on
/// disk via the `object` crate (the same crate `samply-symbols` uses to
/// parse binaries), and finds the symbol whose start address is the
/// largest one not exceeding `offset`.
#[derive(Default)]
pub struct ObjectDynsymSource {
    // Sorted (address, name) tables, one per library, parsed lazily and
    // kept around since reparsing a binary on every sample would be slow.
    tables: Mutex<HashMap<String, Vec<(u64, String)>>>,
}

impl ObjectDynsymSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn load_table(path: &str) -> Vec<(u64, String)> {
        let Ok(data) = std::fs::read(path) else {
            return Vec::new();
        };
        let Ok(file) = object::File::parse(&*data) else {
            return Vec::new();
        };
        let mut table: Vec<(u64, String)> = file
            .symbols()
            .chain(file.dynamic_symbols())
            .filter(|s| s.address() != 0)
            .filter_map(|s| s.name().ok().map(|n| (s.address(), n.to_string())))
            .collect();
        table.sort_by_key(|(addr, _)| *addr);
        table.dedup_by_key(|(addr, _)| *addr);
        table
    }
}

impl FastSymbolSource for ObjectDynsymSource {
    fn lookup(&self, library_path: &str, offset: u64) -> Option<String> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .entry(library_path.to_string())
            .or_insert_with(|| Self::load_table(library_path));

        match table.binary_search_by_key(&offset, |(addr, _)| *addr) {
            Ok(index) => Some(table[index].1.clone()),
            Err(0) => None,
            Err(insertion_index) => Some(table[insertion_index - 1].1.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(Vec<(u64, String)>);
    impl FastSymbolSource for Fake {
        fn lookup(&self, _library_path: &str, offset: u64) -> Option<String> {
            match self.0.binary_search_by_key(&offset, |(a, _)| *a) {
                Ok(i) => Some(self.0[i].1.clone()),
                Err(0) => None,
                Err(i) => Some(self.0[i - 1].1.clone()),
            }
        }
    }

    #[test]
    fn finds_nearest_preceding_symbol() {
        let source = Fake(vec![(0x100, "foo".into()), (0x200, "bar".into())]);
        assert_eq!(source.lookup("x", 0x150), Some("foo".to_string()));
        assert_eq!(source.lookup("x", 0x200), Some("bar".to_string()));
        assert_eq!(source.lookup("x", 0x50), None);
    }

    #[test]
    fn missing_file_yields_no_symbols() {
        let source = ObjectDynsymSource::new();
        assert_eq!(source.lookup("/does/not/exist", 0x1000), None);
    }
}
