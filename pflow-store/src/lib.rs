//! Fixed-capacity, allocation-free mapping from raw call-stack fingerprint to
//! a per-process sample counter (spec component C1).
//!
//! The table is sized once at construction and never grows or evicts. The
//! increment path is the only operation callable from a signal handler: it
//! performs no allocation, takes no lock that could be held outside the
//! handler, and touches no stdio. All synchronization is done with atomics.

mod key;
mod slot;

pub use key::{RawStack, MAX_STACK_DEPTH};

use std::sync::atomic::{AtomicU64, Ordering};

use slot::Slot;

/// Outcome of a single [`SampleStore::increment`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The stack's counter was incremented (the slot may have just been
    /// claimed for the first time, or it may already have existed).
    Counted,
    /// No free or matching slot was found within the probe budget; the
    /// sample was dropped. `dropped_samples` has already been incremented.
    Dropped,
}

/// One fully materialized entry, as produced by [`SampleStore::for_each`].
#[derive(Debug, Clone)]
pub struct SampleEntry {
    pub stack: RawStack,
    pub snapshot_id: u32,
    pub counter: u64,
}

/// Fixed-capacity open-addressed store. Capacity is always a power of two.
pub struct SampleStore {
    slots: Box<[Slot]>,
    mask: u64,
    dropped_samples: AtomicU64,
}

/// Maximum fraction of the table that `increment` will probe before giving
/// up and counting the sample as dropped. Keeps worst-case probe length
/// bounded as required by the signal-safety contract.
const MAX_PROBE_FRACTION_NUMERATOR: u64 = 1;
const MAX_PROBE_FRACTION_DENOMINATOR: u64 = 2;

impl SampleStore {
    /// `capacity` must be a power of two (spec §4.1, `K = 2^k`). Panics
    /// otherwise — this is a configuration error, caught at construction
    /// time, not on the signal-handler path.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "SampleStore capacity must be a power of two, got {capacity}"
        );
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);
        Self {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            dropped_samples: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of samples dropped so far because no free or matching slot
    /// could be found within the probe budget.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Async-signal-safe. Probes from `hash(key) mod capacity`, linearly,
    /// until an occupied slot matching `key` is found (counter bumped), an
    /// empty slot is claimed for `key`, or the probe budget is exhausted.
    pub fn increment(&self, key: &RawStack, snapshot_id: u32) -> IncrementOutcome {
        let capacity = self.slots.len() as u64;
        let max_probes = (capacity * MAX_PROBE_FRACTION_NUMERATOR) / MAX_PROBE_FRACTION_DENOMINATOR;
        let start = key.fingerprint() & self.mask;

        let mut probes = 0u64;
        let mut index = start;
        loop {
            if probes > max_probes {
                self.dropped_samples.fetch_add(1, Ordering::Relaxed);
                return IncrementOutcome::Dropped;
            }

            let slot = &self.slots[index as usize];
            match slot.try_claim_or_match(key, snapshot_id) {
                slot::ProbeResult::Counted => return IncrementOutcome::Counted,
                slot::ProbeResult::Mismatch => {
                    probes += 1;
                    index = (index + 1) & self.mask;
                }
                slot::ProbeResult::LostRace => {
                    // Re-probe the same slot; a concurrent claim is either
                    // about to publish or just lost the race to someone
                    // else, so this is not counted against the probe
                    // budget.
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Visits every occupied slot exactly once, in index order.
    ///
    /// # Safety contract
    /// Must only be called after the sampler has been stopped and all
    /// signals affecting this store have quiesced (spec §4.1). Calling it
    /// concurrently with `increment` does not cause memory unsafety (all
    /// fields are read through the same atomics used for publication) but
    /// the result may be an inconsistent snapshot, which is not useful.
    pub fn for_each(&self, mut visitor: impl FnMut(SampleEntry)) {
        for slot in self.slots.iter() {
            if let Some(entry) = slot.read_if_occupied() {
                visitor(entry);
            }
        }
    }

    /// Total count of occupied slots after quiescence. See [`Self::for_each`]
    /// for the same safety contract.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(addrs: &[u64]) -> RawStack {
        RawStack::new(addrs).unwrap()
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = SampleStore::new(16);
        assert_eq!(store.len(), 0);
        assert_eq!(store.dropped_samples(), 0);
    }

    #[test]
    fn repeated_increment_accumulates_exact_count() {
        let store = SampleStore::new(64);
        let s = stack(&[0x1000, 0x2000, 0x3000]);
        for _ in 0..37 {
            assert_eq!(store.increment(&s, 1), IncrementOutcome::Counted);
        }
        let mut seen = 0;
        store.for_each(|e| {
            assert_eq!(e.stack, s);
            assert_eq!(e.counter, 37);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn distinct_stacks_get_distinct_slots() {
        let store = SampleStore::new(64);
        let a = stack(&[1, 2, 3]);
        let b = stack(&[1, 2, 4]);
        store.increment(&a, 0);
        store.increment(&b, 0);
        store.increment(&a, 0);
        assert_eq!(store.len(), 2);
        let mut total = 0u64;
        store.for_each(|e| total += e.counter);
        assert_eq!(total, 3);
    }

    #[test]
    fn full_store_drops_new_keys_but_still_counts_existing() {
        let store = SampleStore::new(8);
        // Fill past the half-full probe budget with unique stacks.
        for i in 0..8u64 {
            store.increment(&stack(&[i]), 0);
        }
        let pre_drop_len = store.len();
        // A brand new key should eventually be dropped.
        let mut saw_drop = false;
        for i in 100..200u64 {
            if store.increment(&stack(&[i]), 0) == IncrementOutcome::Dropped {
                saw_drop = true;
                break;
            }
        }
        assert!(saw_drop, "expected at least one drop once the table filled up");
        assert!(store.dropped_samples() >= 1);
        // Existing key increments must still succeed (B2).
        let existing = stack(&[0]);
        if store.len() == pre_drop_len {
            let outcome = store.increment(&existing, 0);
            assert_eq!(outcome, IncrementOutcome::Counted);
        }
    }

    #[test]
    fn snapshot_id_is_recorded_on_first_insert_only() {
        let store = SampleStore::new(16);
        let s = stack(&[9, 9, 9]);
        store.increment(&s, 5);
        store.increment(&s, 6); // snapshot id of later increments is not re-recorded
        let mut found = None;
        store.for_each(|e| found = Some(e.snapshot_id));
        assert_eq!(found, Some(5));
    }
}
