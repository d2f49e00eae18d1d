use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::key::RawStack;
use crate::SampleEntry;

const EMPTY: u8 = 0;
const CLAIMING: u8 = 1;
const OCCUPIED: u8 = 2;

pub(crate) enum ProbeResult {
    Counted,
    /// The slot is occupied by a different key; the caller should advance.
    Mismatch,
    /// The slot was contended (either a concurrent claim attempt lost, or
    /// another claim is transiently in progress); the caller should retry
    /// the *same* slot, per spec §4.1 ("on loss of race, re-probe the same
    /// slot").
    LostRace,
}

/// One table slot. `key`/`snapshot_id` are written exactly once, by the
/// thread that wins the `EMPTY -> CLAIMING` compare-exchange, before the
/// slot is published via a `Release` store of `OCCUPIED`. All other readers
/// only ever look at `key`/`snapshot_id` after observing `OCCUPIED` with
/// `Acquire`, so there is no data race despite the `UnsafeCell`.
pub(crate) struct Slot {
    state: AtomicU8,
    key: UnsafeCell<RawStack>,
    snapshot_id: AtomicU32,
    counter: AtomicU64,
}

// SAFETY: all access to `key` is gated by the `state` acquire/release
// protocol documented above; `Slot` is never exposed with interior
// mutability outside this module.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn empty() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            key: UnsafeCell::new(RawStack::empty()),
            snapshot_id: AtomicU32::new(0),
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.state.load(Ordering::Acquire) == OCCUPIED
    }

    pub(crate) fn try_claim_or_match(&self, key: &RawStack, snapshot_id: u32) -> ProbeResult {
        match self.state.load(Ordering::Acquire) {
            OCCUPIED => {
                // SAFETY: OCCUPIED observed with Acquire; key was written
                // before the matching Release store.
                let existing = unsafe { &*self.key.get() };
                if existing == key {
                    self.counter.fetch_add(1, Ordering::Relaxed);
                    ProbeResult::Counted
                } else {
                    ProbeResult::Mismatch
                }
            }
            CLAIMING => ProbeResult::LostRace,
            EMPTY => {
                match self
                    .state
                    .compare_exchange(EMPTY, CLAIMING, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        // SAFETY: we are the sole writer while in CLAIMING
                        // state; no other thread reads `key` until we
                        // publish OCCUPIED below.
                        unsafe {
                            *self.key.get() = *key;
                        }
                        self.snapshot_id.store(snapshot_id, Ordering::Relaxed);
                        self.counter.store(1, Ordering::Relaxed);
                        self.state.store(OCCUPIED, Ordering::Release);
                        ProbeResult::Counted
                    }
                    Err(_) => ProbeResult::LostRace,
                }
            }
            other => unreachable!("invalid slot state {other}"),
        }
    }

    pub(crate) fn read_if_occupied(&self) -> Option<SampleEntry> {
        if self.state.load(Ordering::Acquire) != OCCUPIED {
            return None;
        }
        // SAFETY: OCCUPIED observed with Acquire; key/snapshot_id were
        // published before the Release store that set this state.
        let stack = unsafe { *self.key.get() };
        Some(SampleEntry {
            stack,
            snapshot_id: self.snapshot_id.load(Ordering::Relaxed),
            counter: self.counter.load(Ordering::Relaxed),
        })
    }
}
