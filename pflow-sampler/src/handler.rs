//! The actual signal-handler body (spec §4.3 "Handler contract"): read the
//! current snapshot id, unwind into a bounded buffer, check the captured
//! addresses against the current library map, bump C1, and return. Nothing
//! here allocates, takes a lock that might be held outside a handler, or
//! performs I/O.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use pflow_libmap::RefreshCoordinator;
use pflow_store::{RawStack, SampleStore, MAX_STACK_DEPTH};

use crate::current_map::CurrentMap;
use crate::unwinder::StackUnwinder;

pub(crate) struct HandlerState {
    pub store: Arc<SampleStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub current_map: Arc<CurrentMap>,
    pub unwinder: Arc<dyn StackUnwinder>,
}

/// Process-wide slot for the one sampler allowed to be active at a time.
/// `libc::sigaction` is itself process-wide, so there is no point
/// supporting more than one live handler; [`crate::sampler::Sampler::arm`]
/// enforces this by failing if the slot is already occupied.
static GLOBAL: AtomicPtr<HandlerState> = AtomicPtr::new(ptr::null_mut());

/// Installs `state` as the active handler state. Returns `false` without
/// changing anything if a sampler is already armed.
pub(crate) fn publish(state: Box<HandlerState>) -> bool {
    let raw = Box::into_raw(state);
    match GLOBAL.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => true,
        Err(_) => {
            // SAFETY: just allocated above, never shared.
            drop(unsafe { Box::from_raw(raw) });
            false
        }
    }
}

/// Clears the global slot and hands ownership back. Must only be called
/// after the timer has been disarmed and the signal masked/reset, so no
/// handler invocation can still be reading the old pointer (spec §5
/// teardown order: disarm timer, mask signal, export).
pub(crate) fn unpublish() -> Option<Box<HandlerState>> {
    let raw = GLOBAL.swap(ptr::null_mut(), Ordering::AcqRel);
    if raw.is_null() {
        None
    } else {
        // SAFETY: caller has already guaranteed no handler can be running.
        Some(unsafe { Box::from_raw(raw) })
    }
}

/// The actual `extern "C"` entry point installed via `sigaction`.
pub(crate) extern "C" fn on_signal(_signum: libc::c_int) {
    let raw = GLOBAL.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    // SAFETY: the pointee is only ever freed by `unpublish`, which the
    // sampler guarantees happens after the signal has been masked, so a
    // handler invocation observing a non-null pointer here always sees a
    // live `HandlerState`.
    let state = unsafe { &*raw };

    let mut addresses = [0u64; MAX_STACK_DEPTH];
    let depth = state.unwinder.capture(&mut addresses).min(MAX_STACK_DEPTH);
    let captured = &addresses[..depth];

    let snapshot_id = state.coordinator.current_snapshot_id();
    let map = state.current_map.load();
    let in_range = captured.iter().all(|&addr| map.resolve(addr).is_some());
    if !in_range {
        state.coordinator.mark_needs_refresh();
    }

    // `RawStack::new` cannot fail here: `captured.len() <= MAX_STACK_DEPTH`
    // by construction above.
    if let Ok(stack) = RawStack::new(captured) {
        state.store.increment(&stack, snapshot_id);
    }
}
