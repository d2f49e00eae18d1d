use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Signal-safe glue between the stack sampler's handler and the
/// out-of-handler routine that actually re-scans library maps (spec §4.3
/// "Outside-handler work"). The handler only ever calls
/// [`RefreshCoordinator::mark_needs_refresh`] and
/// [`RefreshCoordinator::current_snapshot_id`]; everything that allocates
/// or blocks lives outside it.
pub struct RefreshCoordinator {
    current_snapshot_id: AtomicU32,
    needs_refresh: AtomicBool,
    /// Non-reentrant flag: only one capture may be in flight, enforced with
    /// a compare-and-set so a slow capture on one thread doesn't overlap
    /// with another triggered meanwhile.
    capturing: AtomicBool,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RefreshCoordinator {
    pub fn new(initial_snapshot_id: u32) -> Self {
        Self {
            current_snapshot_id: AtomicU32::new(initial_snapshot_id),
            needs_refresh: AtomicBool::new(false),
            capturing: AtomicBool::new(false),
        }
    }

    /// Async-signal-safe. Called from the handler when an address falls
    /// outside the current snapshot.
    pub fn mark_needs_refresh(&self) {
        self.needs_refresh.store(true, Ordering::Relaxed);
    }

    /// Async-signal-safe.
    pub fn current_snapshot_id(&self) -> u32 {
        self.current_snapshot_id.load(Ordering::Acquire)
    }

    /// Not signal-safe: clears the flag and claims the right to perform a
    /// capture. Returns `true` if the caller won the claim and should go
    /// on to call [`crate::LibraryMapRegistry::capture`] followed by
    /// [`Self::publish_snapshot`]; returns `false` if a refresh wasn't
    /// pending or another capture is already in progress.
    pub fn try_begin_refresh(&self) -> bool {
        if !self.needs_refresh.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Advances the current snapshot id and releases the capture claim.
    /// Must be called after a successful [`Self::try_begin_refresh`], once
    /// the new snapshot has been stored in the registry.
    pub fn publish_snapshot(&self, new_id: u32) {
        self.current_snapshot_id.store(new_id, Ordering::Release);
        self.capturing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_only_claimed_once() {
        let c = RefreshCoordinator::new(0);
        assert!(!c.try_begin_refresh(), "no refresh requested yet");
        c.mark_needs_refresh();
        assert!(c.try_begin_refresh());
        // A second caller must not also win the claim before publish.
        assert!(!c.try_begin_refresh());
        c.publish_snapshot(1);
        assert_eq!(c.current_snapshot_id(), 1);
    }
}
