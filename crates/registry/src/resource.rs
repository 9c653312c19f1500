use std::ptr::NonNull;

/// A writable memory mapping backing a resource's storage.
///
/// `munmap`'d on drop. The pointer is only ever touched through the
/// registry, which is reached exclusively while the process-wide
/// sync-subsystem mutex (see `vtest-core::SharedState`) is held, so sharing
/// it across the mock renderer's reentrant callbacks is sound.
#[derive(Debug)]
pub struct Iov {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is only read/written while the owning mutex is held;
// no two call sites can observe it concurrently from different threads.
unsafe impl Send for Iov {}
unsafe impl Sync for Iov {}

impl Iov {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Iov { ptr, len }
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping has zero length (never true in practice: the
    /// wire contract requires a non-zero shm size, but kept for API
    /// completeness).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the mapping as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` was returned by a successful `mmap` of `len` bytes
        // and is not unmapped until `Drop`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Borrows the mapping as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Iov {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe exactly the mapping created in
        // `Registry::attach_shm` and have not been unmapped before.
        if let Err(err) = unsafe { rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::warn!(%err, "munmap of resource iov failed");
        }
    }
}

/// A renderer-side buffer/texture record.
#[derive(Debug)]
pub struct Resource {
    server_id: u32,
    client_id: u32,
    iov: Option<Iov>,
}

impl Resource {
    pub(crate) fn new(server_id: u32, client_id: u32) -> Self {
        Resource {
            server_id,
            client_id,
            iov: None,
        }
    }

    /// The server-assigned, never-recycled-while-live resource id.
    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// The client-visible handle: equal to `server_id` in protocol >= 3,
    /// otherwise the client-supplied value.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// The shared-memory mapping, if this resource is shm-backed.
    pub fn iov(&self) -> Option<&Iov> {
        self.iov.as_ref()
    }

    /// Mutable access to the shared-memory mapping.
    pub fn iov_mut(&mut self) -> Option<&mut Iov> {
        self.iov.as_mut()
    }

    pub(crate) fn attach_iov(&mut self, iov: Iov) {
        self.iov = Some(iov);
    }
}
