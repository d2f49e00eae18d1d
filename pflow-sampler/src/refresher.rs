//! Outside-handler refresh routine (spec §4.3 "Outside-handler work"): a
//! background thread that notices `needs_refresh`, re-scans modules, and
//! publishes a new snapshot. Everything here is free to allocate and
//! block; none of it runs on the sampled thread or inside a signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pflow_libmap::{LibraryMapRegistry, ModuleScanner};

use crate::sampler::Sampler;

/// Polls [`Sampler::coordinator`] on a fixed interval and, whenever a
/// refresh has been requested, re-scans with `scanner` and publishes the
/// result back to the sampler.
pub struct BackgroundRefresher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRefresher {
    pub fn spawn(
        sampler: Arc<Sampler>,
        scanner: Arc<dyn ModuleScanner + Send + Sync>,
        registry: Arc<Mutex<LibraryMapRegistry>>,
        poll_interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(poll_interval);
                if sampler.coordinator().try_begin_refresh() {
                    let mut registry = registry.lock().unwrap();
                    match registry.capture(scanner.as_ref()) {
                        Ok(new_id) => {
                            if let Some(snapshot) = registry.get(new_id) {
                                sampler.publish_refreshed_map(snapshot);
                                log::debug!("refreshed library map to snapshot {new_id}");
                            } else {
                                sampler.abandon_refresh();
                            }
                        }
                        Err(err) => {
                            log::warn!("library map refresh failed: {err}");
                            sampler.abandon_refresh();
                        }
                    }
                }
            }
        });

        Self { stop, handle: Some(handle) }
    }

    /// Signals the background thread to exit after its current sleep and
    /// waits for it to finish. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_libmap::{LibraryMap, LibraryMapEntry};
    use pflow_store::SampleStore;
    use crate::unwinder::NullUnwinder;

    struct FixedScanner(Vec<LibraryMapEntry>);
    impl ModuleScanner for FixedScanner {
        fn scan(&self) -> Vec<LibraryMapEntry> {
            self.0.clone()
        }
    }

    #[test]
    fn refresher_publishes_a_new_snapshot_once_requested() {
        let initial = Arc::new(LibraryMap::new(0, vec![]).unwrap());
        let mut seed_registry = LibraryMapRegistry::new();
        seed_registry.load((*initial).clone());
        let registry = Arc::new(Mutex::new(seed_registry));

        let dir = tempfile::tempdir().unwrap();
        let sampler = Arc::new(Sampler::new(
            Arc::new(SampleStore::new(16)),
            initial,
            Arc::new(NullUnwinder),
            Arc::clone(&registry),
            9000,
            dir.path().to_path_buf(),
        ));
        sampler.coordinator().mark_needs_refresh();

        let scanner = Arc::new(FixedScanner(vec![LibraryMapEntry {
            base: 0x1000,
            end: 0x2000,
            path: "app".to_string(),
            file_offset: 0,
        }]));

        let mut refresher = BackgroundRefresher::spawn(
            Arc::clone(&sampler),
            scanner,
            registry,
            Duration::from_millis(5),
        );

        // Give the background thread a couple of poll cycles.
        std::thread::sleep(Duration::from_millis(50));
        refresher.stop();

        assert!(sampler.current_map().load().resolve(0x1500).is_some());
    }
}
