use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SyncError;
use crate::id_alloc::IdAllocator;
use crate::Result;

/// A 64-bit monotonic timeline counter.
///
/// Refcounting is modeled by `Arc`'s own strong count rather than a
/// hand-rolled counter: every table, [`crate::SyncQueueSubmit`],
/// and [`crate::SyncWait`] slot that reaches a timeline holds its own clone
/// of the handle. The id is returned to the shared [`IdAllocator`] from
/// `Drop`, so it only goes back to the free list once the *last* clone is
/// gone, regardless of which owner happened to drop last.
#[derive(Debug)]
pub struct SyncInner {
    id: u32,
    value: Mutex<u64>,
    ids: IdAllocator,
}

/// A cloneable, reference-counted handle to a [`SyncInner`].
pub type SyncHandle = Arc<SyncInner>;

impl SyncInner {
    /// The timeline's 32-bit id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The current value.
    pub fn value(&self) -> u64 {
        *self.value.lock().unwrap()
    }

    pub(crate) fn set_value(&self, v: u64) {
        *self.value.lock().unwrap() = v;
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        self.ids.free(self.id);
    }
}

/// The per-context table of live timelines, keyed by id.
#[derive(Debug, Default)]
pub struct TimelineStore {
    syncs: HashMap<u32, SyncHandle>,
}

impl TimelineStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        TimelineStore::default()
    }

    /// Creates a new timeline with the given initial value, allocating a
    /// fresh process-wide id from `ids`.
    pub fn create(&mut self, ids: &IdAllocator, initial_value: u64) -> SyncHandle {
        let id = ids.alloc();
        let handle = Arc::new(SyncInner {
            id,
            value: Mutex::new(initial_value),
            ids: ids.clone(),
        });
        self.syncs.insert(id, handle.clone());
        handle
    }

    /// Looks up a timeline by id, cloning its handle.
    pub fn lookup(&self, id: u32) -> Option<SyncHandle> {
        self.syncs.get(&id).cloned()
    }

    /// Reads a timeline's current value.
    pub fn read(&self, id: u32) -> Result<u64> {
        self.lookup(id).map(|h| h.value()).ok_or(SyncError::Exists)
    }

    /// Drops the table's reference to `id`. The id itself is only returned
    /// to the allocator once every other owner (a queued submit, a pending
    /// wait) has also dropped its clone — see [`SyncInner`]'s `Drop` impl.
    pub fn unref(&mut self, id: u32) -> Result<()> {
        self.syncs.remove(&id).map(drop).ok_or(SyncError::Exists)
    }

    /// Drains every timeline out of the table, for context teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = SyncHandle> + '_ {
        self.syncs.drain().map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_ids_starting_at_one() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s = store.create(&ids, 5);
        assert_eq!(s.id(), 1);
        assert_eq!(s.value(), 5);
    }

    #[test]
    fn read_returns_the_current_value() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s = store.create(&ids, 5);
        s.set_value(10);
        assert_eq!(store.read(s.id()).unwrap(), 10);
    }

    #[test]
    fn id_is_reused_only_after_every_owner_drops() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s = store.create(&ids, 0);
        let id = s.id();
        let extra = s.clone();
        store.unref(id).unwrap();
        // `extra` still holds a strong reference: the id must not be reused yet.
        let other = store.create(&ids, 0);
        assert_ne!(other.id(), id);
        drop(s);
        drop(extra);
        // Now nothing holds `id`; a later create reuses it.
        let reused = store.create(&ids, 0);
        assert_eq!(reused.id(), id);
    }
}
