use std::sync::Arc;
use std::time::Duration;

use crate::{
    DebugSymbolSource, FastSymbolSource, SymbolCache, SymbolInfo, SymbolStrategy,
};

/// Construction-time configuration for a [`SymbolResolver`] (spec §6
/// `SymbolStrategy`, `ResolveSymbols`).
#[derive(Clone)]
pub struct SymbolResolverConfig {
    pub strategy: SymbolStrategy,
    /// Applies only to `DebugOnly`/`AutoFallback`'s external-tool call
    /// (spec §5 "Timeouts apply only to external symbolication calls").
    pub debug_tool_timeout: Duration,
}

impl Default for SymbolResolverConfig {
    fn default() -> Self {
        Self {
            strategy: SymbolStrategy::AutoFallback,
            debug_tool_timeout: Duration::from_secs(2),
        }
    }
}

/// Ties a strategy choice to the two backends and the shared cache (spec
/// §4.5). The cache is always consulted first; a miss computes the answer
/// according to `strategy` and stores it, positive or negative.
pub struct SymbolResolver {
    config: SymbolResolverConfig,
    fast: Arc<dyn FastSymbolSource>,
    debug: Arc<dyn DebugSymbolSource>,
    cache: SymbolCache,
}

impl SymbolResolver {
    pub fn new(
        config: SymbolResolverConfig,
        fast: Arc<dyn FastSymbolSource>,
        debug: Arc<dyn DebugSymbolSource>,
    ) -> Self {
        Self {
            config,
            fast,
            debug,
            cache: SymbolCache::new(),
        }
    }

    pub fn cache(&self) -> &SymbolCache {
        &self.cache
    }

    /// Resolves `(library_path, offset)` under the configured strategy.
    /// Always succeeds: an unresolved symbol is reported via an empty
    /// [`SymbolInfo`], never as an error (spec §4.5, §7 `ResolutionMiss`).
    pub fn resolve(&self, library_path: &str, offset: u64) -> SymbolInfo {
        self.cache.get_or_insert_with(library_path, offset, || {
            self.compute(library_path, offset)
        })
    }

    fn compute(&self, library_path: &str, offset: u64) -> SymbolInfo {
        match self.config.strategy {
            SymbolStrategy::FastOnly => self.fast_lookup(library_path, offset),
            SymbolStrategy::DebugOnly => self.debug_lookup(library_path, offset),
            SymbolStrategy::AutoFallback => {
                let fast = self.fast_lookup(library_path, offset);
                if !fast.is_empty() {
                    fast
                } else {
                    self.debug_lookup(library_path, offset)
                }
            }
        }
    }

    fn fast_lookup(&self, library_path: &str, offset: u64) -> SymbolInfo {
        match self.fast.lookup(library_path, offset) {
            Some(function) => SymbolInfo::function_only(function),
            None => SymbolInfo::default(),
        }
    }

    fn debug_lookup(&self, library_path: &str, offset: u64) -> SymbolInfo {
        match self.debug.lookup(library_path, offset) {
            Some((function, file, line)) => SymbolInfo::full(function, file, line),
            None => SymbolInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptyFast;
    impl FastSymbolSource for EmptyFast {
        fn lookup(&self, _library_path: &str, _offset: u64) -> Option<String> {
            None
        }
    }

    struct CountingDebug {
        calls: AtomicUsize,
    }
    impl DebugSymbolSource for CountingDebug {
        fn lookup(&self, _library_path: &str, _offset: u64) -> Option<(String, String, u32)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(("memcpy".to_string(), "memcpy.c".to_string(), 42))
        }
    }

    #[test]
    fn auto_fallback_uses_debug_when_fast_is_empty_and_caches_it() {
        let debug = Arc::new(CountingDebug { calls: AtomicUsize::new(0) });
        let resolver = SymbolResolver::new(
            SymbolResolverConfig::default(),
            Arc::new(EmptyFast),
            debug.clone(),
        );

        for _ in 0..5 {
            let info = resolver.resolve("libc.so", 0x1234);
            assert_eq!(info, SymbolInfo::full("memcpy", "memcpy.c", 42));
        }

        assert_eq!(debug.calls.load(Ordering::SeqCst), 1);
        let stats = resolver.cache().stats();
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn fast_only_never_consults_debug() {
        let debug = Arc::new(CountingDebug { calls: AtomicUsize::new(0) });
        let resolver = SymbolResolver::new(
            SymbolResolverConfig { strategy: SymbolStrategy::FastOnly, ..Default::default() },
            Arc::new(EmptyFast),
            debug.clone(),
        );
        let info = resolver.resolve("libc.so", 0x1234);
        assert!(info.is_empty());
        assert_eq!(debug.calls.load(Ordering::SeqCst), 0);
    }
}
