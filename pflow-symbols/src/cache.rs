use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::SymbolInfo;

/// Snapshot of cache hit/miss/size counters (spec §4.5 "Cache").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Keyed by `(library_path, offset)`, stores whole `SymbolInfo` values
/// including negative (empty) results, so a key is never recomputed twice
/// unless the cache is explicitly cleared (spec §4.5, §4.6 L6). Reads take
/// a shared lock; only a genuine miss takes the exclusive lock to insert,
/// which keeps concurrent lookups cheap.
pub struct SymbolCache {
    entries: RwLock<FxHashMap<(String, u64), SymbolInfo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for SymbolCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `(path, offset)` if present, recording
    /// a hit. Does not compute anything on a miss; see
    /// [`Self::get_or_insert_with`] for the usual call pattern.
    pub fn get(&self, path: &str, offset: u64) -> Option<SymbolInfo> {
        let entries = self.entries.read();
        let found = entries.get(&(path.to_string(), offset)).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Looks up `(path, offset)`, computing and storing `compute()`'s
    /// result (positive or negative) on a miss. `compute` is never called
    /// more than once per key between clears (spec §4.5).
    pub fn get_or_insert_with(
        &self,
        path: &str,
        offset: u64,
        compute: impl FnOnce() -> SymbolInfo,
    ) -> SymbolInfo {
        if let Some(hit) = self.get(path, offset) {
            return hit;
        }
        // Miss: recompute, but re-check after acquiring the write lock in
        // case a racing thread already populated the entry (the `compute`
        // callback may be expensive, e.g. it spawns a child process, so we
        // don't want to hold the write lock across it).
        self.misses.fetch_add(1, Ordering::Relaxed);
        let info = compute();
        let mut entries = self.entries.write();
        entries
            .entry((path.to_string(), offset))
            .or_insert(info)
            .clone()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn repeated_lookups_compute_once() {
        let cache = SymbolCache::new();
        let compute_count = AtomicUsize::new(0);
        let compute = || {
            compute_count.fetch_add(1, Ordering::SeqCst);
            SymbolInfo::full("memcpy", "memcpy.c", 42)
        };

        let mut last = None;
        for _ in 0..5 {
            last = Some(cache.get_or_insert_with("libc.so", 0x1234, compute));
        }

        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
        assert_eq!(last, Some(SymbolInfo::full("memcpy", "memcpy.c", 42)));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn negative_results_are_cached_too() {
        let cache = SymbolCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let info = cache.get_or_insert_with("a.so", 1, || {
                calls += 1;
                SymbolInfo::default()
            });
            assert!(info.is_empty());
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn clear_forces_recompute() {
        let cache = SymbolCache::new();
        cache.get_or_insert_with("a.so", 1, SymbolInfo::default);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
        let mut calls = 0;
        cache.get_or_insert_with("a.so", 1, || {
            calls += 1;
            SymbolInfo::default()
        });
        assert_eq!(calls, 1);
    }
}
