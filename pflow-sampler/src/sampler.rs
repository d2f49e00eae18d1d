//! Process-wide `stopped|armed|running` state machine (spec §5) wrapping
//! a `SIGPROF`/`ITIMER_PROF` timer via raw `libc` calls. `signal_hook` was
//! deliberately not used here: it is not a dependency of the profiler this
//! crate is modeled on, which talks to `sigaction`/`setitimer` directly,
//! so this crate follows the same path (see `DESIGN.md`).

use std::mem::MaybeUninit;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pflow_libmap::{LibraryMap, LibraryMapRegistry, RefreshCoordinator};
use pflow_store::SampleStore;

use crate::current_map::CurrentMap;
use crate::error::SamplerError;
use crate::handler::{self, HandlerState};
use crate::unwinder::StackUnwinder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    Armed,
    Running,
}

/// Owns the pieces a running sampler needs: where samples land (C1), the
/// signal-safe coordination point for refreshes (C2's
/// [`RefreshCoordinator`]), the published "current" library map, and the
/// unwinding strategy. Exactly one [`Sampler`] may be armed at a time
/// process-wide, since `sigaction`/`setitimer` are themselves process-wide
/// resources.
pub struct Sampler {
    store: Arc<SampleStore>,
    coordinator: Arc<RefreshCoordinator>,
    current_map: Arc<CurrentMap>,
    unwinder: Arc<dyn StackUnwinder>,
    state: SamplerState,
    previous_action: Option<libc::sigaction>,
    registry: Arc<Mutex<LibraryMapRegistry>>,
    process_id: u32,
    output_directory: PathBuf,
}

impl Sampler {
    /// `registry` must be the same registry `initial_map` came from: it is
    /// consulted again at teardown to export every snapshot captured over
    /// the sampler's lifetime (spec §4.3, §5: "teardown flushes C1 and
    /// emits all live C2 snapshots").
    pub fn new(
        store: Arc<SampleStore>,
        initial_map: Arc<LibraryMap>,
        unwinder: Arc<dyn StackUnwinder>,
        registry: Arc<Mutex<LibraryMapRegistry>>,
        process_id: u32,
        output_directory: PathBuf,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(initial_map.id()));
        Self {
            store,
            coordinator,
            current_map: Arc::new(CurrentMap::new(initial_map)),
            unwinder,
            state: SamplerState::Stopped,
            previous_action: None,
            registry,
            process_id,
            output_directory,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn current_map(&self) -> &Arc<CurrentMap> {
        &self.current_map
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    /// Installs the `SIGPROF` handler without arming the timer yet.
    /// `Stopped -> Armed`.
    pub fn arm(&mut self) -> Result<(), SamplerError> {
        if self.state != SamplerState::Stopped {
            return Err(SamplerError::InvalidTransition { current: self.state, attempted: "arm" });
        }

        let handler_state = Box::new(HandlerState {
            store: Arc::clone(&self.store),
            coordinator: Arc::clone(&self.coordinator),
            current_map: Arc::clone(&self.current_map),
            unwinder: Arc::clone(&self.unwinder),
        });
        if !handler::publish(handler_state) {
            return Err(SamplerError::InitFailed(
                "another sampler is already armed in this process".to_string(),
            ));
        }

        let mut action: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
        action.sa_sigaction = handler::on_signal as usize;
        action.sa_flags = libc::SA_RESTART;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }

        let mut previous: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
        let rc = unsafe { libc::sigaction(libc::SIGPROF, &action, &mut previous) };
        if rc != 0 {
            handler::unpublish();
            return Err(SamplerError::InitFailed(format!(
                "sigaction failed with errno {}",
                std::io::Error::last_os_error()
            )));
        }

        self.previous_action = Some(previous);
        self.state = SamplerState::Armed;
        log::debug!("sampler armed SIGPROF handler");
        Ok(())
    }

    /// Arms the interval timer that drives the handler. `Armed -> Running`.
    pub fn run(&mut self, interval: Duration) -> Result<(), SamplerError> {
        if self.state != SamplerState::Armed {
            return Err(SamplerError::InvalidTransition { current: self.state, attempted: "run" });
        }

        let timeval = libc::timeval {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_usec: interval.subsec_micros() as libc::suseconds_t,
        };
        let itimerval = libc::itimerval { it_interval: timeval, it_value: timeval };
        let rc = unsafe { libc::setitimer(libc::ITIMER_PROF, &itimerval, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(SamplerError::InitFailed(format!(
                "setitimer failed with errno {}",
                std::io::Error::last_os_error()
            )));
        }

        self.state = SamplerState::Running;
        log::info!("sampler running at {:?} interval", interval);
        Ok(())
    }

    /// Disarms the timer, masks/restores the signal, reclaims the handler
    /// state, and exports C1/C2, in that order (spec §5 teardown: disarm
    /// timer, mask signal, then export the store and snapshots). Idempotent
    /// from `Armed` or `Running`; a no-op from `Stopped`.
    pub fn stop(&mut self) {
        if self.state == SamplerState::Stopped {
            return;
        }

        let zero = libc::timeval { tv_sec: 0, tv_usec: 0 };
        let disarm = libc::itimerval { it_interval: zero, it_value: zero };
        unsafe {
            libc::setitimer(libc::ITIMER_PROF, &disarm, std::ptr::null_mut());
        }

        if let Some(previous) = self.previous_action.take() {
            unsafe {
                libc::sigaction(libc::SIGPROF, &previous, std::ptr::null_mut());
            }
        }

        // Dropping the reclaimed state only after the signal is masked
        // guarantees no in-flight handler invocation still holds the raw
        // pointer this frees.
        drop(handler::unpublish());

        self.state = SamplerState::Stopped;
        self.export();
        log::debug!("sampler stopped");
    }

    /// Writes `process-<pid>.pflw` and `process-<pid>.libmap` under
    /// `output_directory` (spec §6 "Process attachment"). Called only after
    /// the handler is fully unpublished, so the store and registry are
    /// quiescent. Failures are logged, not propagated: by the time this
    /// runs the process is already tearing down and there is no caller
    /// left to hand a `Result` to.
    fn export(&self) {
        if let Err(err) = std::fs::create_dir_all(&self.output_directory) {
            log::error!("pflow: could not create output directory: {err}");
            return;
        }

        let snapshots: Vec<LibraryMap> = {
            let registry = self.registry.lock().unwrap();
            registry.snapshots().iter().map(|s| (**s).clone()).collect()
        };
        let libmap_path = self.output_directory.join(format!("process-{}.libmap", self.process_id));
        if let Err(err) = pflow_codec::export_libmap(&snapshots, self.process_id, &libmap_path) {
            log::error!("pflow: failed to export library map: {err}");
        }

        let pflw_path = self.output_directory.join(format!("process-{}.pflw", self.process_id));
        let default_snapshot_id = self.coordinator.current_snapshot_id();
        if let Err(err) =
            pflow_codec::export_samples(&self.store, self.process_id, default_snapshot_id, &pflw_path)
        {
            log::error!("pflow: failed to export sample store: {err}");
        }
    }

    /// Snapshot of how many samples have been irrecoverably dropped so
    /// far because C1's probe budget was exhausted.
    pub fn dropped_samples(&self) -> u64 {
        self.store.dropped_samples()
    }

    /// Publishes a freshly captured library map as "current" for the
    /// handler to check against, and advances the coordinator's notion of
    /// the current snapshot. Called by the background refresh routine,
    /// never from the handler.
    pub fn publish_refreshed_map(&self, new_map: Arc<LibraryMap>) {
        let new_id = new_map.id();
        self.current_map.publish(new_map);
        self.coordinator.publish_snapshot(new_id);
    }

    /// Releases a claimed-but-failed refresh attempt so a future address
    /// miss can try again, without changing the published snapshot.
    pub fn abandon_refresh(&self) {
        let id = self.coordinator.current_snapshot_id();
        self.coordinator.publish_snapshot(id);
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if self.state != SamplerState::Stopped {
            log::warn!("Sampler dropped without an explicit stop; tearing down now");
            self.stop();
        }
    }
}

// SAFETY: `previous_action` is a plain C struct snapshot, not a pointer
// into shared state; everything else is already `Arc`/atomic-backed.
unsafe impl Send for Sampler {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unwinder::NullUnwinder;
    use pflow_store::RawStack;
    use tempfile::TempDir;

    fn empty_map(id: u32) -> Arc<LibraryMap> {
        Arc::new(LibraryMap::new(id, vec![]).unwrap())
    }

    /// A registry seeded with `empty_map(id)`, plus the output directory a
    /// test's `Sampler` will export into.
    fn test_fixture(id: u32) -> (Arc<LibraryMap>, Arc<Mutex<LibraryMapRegistry>>, TempDir) {
        let map = empty_map(id);
        let mut registry = LibraryMapRegistry::new();
        registry.load((*map).clone());
        (map, Arc::new(Mutex::new(registry)), tempfile::tempdir().unwrap())
    }

    fn new_test_sampler(id: u32) -> (Sampler, TempDir) {
        let (map, registry, dir) = test_fixture(id);
        let sampler = Sampler::new(
            Arc::new(SampleStore::new(16)),
            map,
            Arc::new(NullUnwinder),
            registry,
            4242,
            dir.path().to_path_buf(),
        );
        (sampler, dir)
    }

    #[test]
    fn starts_stopped() {
        let (sampler, _dir) = new_test_sampler(0);
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn run_before_arm_is_rejected() {
        let (mut sampler, _dir) = new_test_sampler(0);
        assert!(sampler.run(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn arm_then_stop_returns_to_stopped_without_running_the_timer() {
        let (mut sampler, _dir) = new_test_sampler(0);
        sampler.arm().unwrap();
        assert_eq!(sampler.state(), SamplerState::Armed);
        sampler.stop();
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn double_arm_in_process_is_rejected() {
        let (mut first, _dir1) = new_test_sampler(0);
        first.arm().unwrap();

        let (mut second, _dir2) = new_test_sampler(1);
        assert!(second.arm().is_err());

        first.stop();
    }

    #[test]
    fn publish_refreshed_map_updates_coordinator_snapshot_id() {
        let (sampler, _dir) = new_test_sampler(0);
        sampler.publish_refreshed_map(empty_map(7));
        assert_eq!(sampler.coordinator().current_snapshot_id(), 7);
        assert_eq!(sampler.current_map().load().id(), 7);
    }

    #[test]
    fn stop_exports_the_store_and_every_registered_snapshot() {
        let (mut sampler, dir) = new_test_sampler(0);
        sampler.store().increment(&RawStack::new(&[0x1000]).unwrap(), 0);
        sampler.arm().unwrap();
        sampler.stop();

        let pflw = pflow_codec::import_samples(&dir.path().join("process-4242.pflw")).unwrap();
        assert_eq!(pflw.process_id, 4242);
        assert_eq!(pflw.entries.len(), 1);

        let (process_id, snapshots) = pflow_codec::import_libmap(&dir.path().join("process-4242.libmap")).unwrap();
        assert_eq!(process_id, 4242);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id(), 0);
    }
}
