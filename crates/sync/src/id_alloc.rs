use std::sync::{Arc, Mutex};

/// A monotonic id allocator with free-list reuse, mirroring
/// `vtest-registry`'s allocator: the resource table and the timeline store
/// both want id-stable reuse but are otherwise unrelated domains, so each
/// crate owns a small copy rather than sharing one.
#[derive(Debug)]
struct Inner {
    next: u32,
    free: Vec<u32>,
}

/// Shared handle to an [`Inner`] allocator.
///
/// Timelines are reference-counted ([`crate::SyncHandle`]) and may be held
/// simultaneously by a context's table, a [`crate::SyncQueueSubmit`], and a
/// [`crate::SyncWait`]; the id must only return to the free list once the
/// *last* such owner drops, wherever that happens. [`SyncInner`]'s `Drop`
/// impl frees through this shared handle rather than the store having to
/// recheck strong counts at every call site.
///
/// [`SyncInner`]: crate::SyncInner
#[derive(Debug, Clone)]
pub struct IdAllocator {
    inner: Arc<Mutex<Inner>>,
}

impl IdAllocator {
    /// Creates an allocator whose first freshly minted id is `first`.
    pub fn starting_at(first: u32) -> Self {
        IdAllocator {
            inner: Arc::new(Mutex::new(Inner {
                next: first,
                free: Vec::new(),
            })),
        }
    }

    /// Allocates the next id, preferring a freed one over growing the
    /// monotonic counter.
    pub fn alloc(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.free.pop() {
            return id;
        }
        let id = inner.next;
        inner.next += 1;
        id
    }

    /// Returns `id` to the free list for future reuse.
    pub fn free(&self, id: u32) {
        self.inner.lock().unwrap().free.push(id);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
