//! Signal-safe holder for "the library map the handler should check
//! addresses against right now" (spec §4.3 step 3: "if any address falls
//! outside the current snapshot, set `needs_refresh`").
//!
//! `pflow_libmap::LibraryMapRegistry::get`/`latest` allocate (they walk a
//! `Vec` and clone an `Arc`) and are explicitly documented as not
//! signal-safe, so the handler cannot call them directly. This module
//! publishes a raw pointer to the current snapshot that the handler can
//! load and dereference without taking a lock or allocating.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use pflow_libmap::LibraryMap;

/// Holds a single "currently published" [`LibraryMap`] behind an atomic
/// pointer. Every snapshot ever published stays alive for the holder's
/// entire lifetime — it is never reclaimed, only superseded — which is
/// what makes an unsynchronized load-and-deref in the handler sound: the
/// pointee can never be freed out from under a reader (spec §3: "old
/// snapshots are retained in memory until export", so this mirrors a
/// guarantee the registry already makes).
pub struct CurrentMap {
    ptr: AtomicPtr<LibraryMap>,
}

impl CurrentMap {
    pub fn new(initial: Arc<LibraryMap>) -> Self {
        Self { ptr: AtomicPtr::new(Arc::into_raw(initial) as *mut LibraryMap) }
    }

    /// Async-signal-safe: one atomic load plus a raw dereference.
    pub fn load(&self) -> &LibraryMap {
        unsafe { &*self.ptr.load(Ordering::Acquire) }
    }

    /// Not signal-safe; called only by the outside-handler refresh
    /// routine after a new snapshot has been captured. Deliberately never
    /// reconstructs and drops the previous `Arc` — see the type-level
    /// doc comment.
    pub fn publish(&self, new_map: Arc<LibraryMap>) {
        self.ptr.store(Arc::into_raw(new_map) as *mut LibraryMap, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_libmap::LibraryMapEntry;

    fn map(id: u32, base: u64, end: u64) -> Arc<LibraryMap> {
        Arc::new(
            LibraryMap::new(
                id,
                vec![LibraryMapEntry { base, end, path: "app".to_string(), file_offset: 0 }],
            )
            .unwrap(),
        )
    }

    #[test]
    fn load_returns_the_published_snapshot() {
        let holder = CurrentMap::new(map(0, 0x1000, 0x2000));
        assert_eq!(holder.load().id(), 0);
    }

    #[test]
    fn publish_replaces_the_visible_snapshot() {
        let holder = CurrentMap::new(map(0, 0x1000, 0x2000));
        holder.publish(map(1, 0x3000, 0x4000));
        assert_eq!(holder.load().id(), 1);
        assert!(holder.load().resolve(0x3100).is_some());
    }
}
