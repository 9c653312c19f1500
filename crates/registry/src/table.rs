use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;

use rustix::mm::{MapFlags, ProtFlags};

use crate::error::RegistryError;
use crate::id_alloc::IdAllocator;
use crate::resource::{Iov, Resource};
use crate::shm::ShmProvider;
use crate::Result;

/// The per-context resource table.
///
/// Keyed by the client-visible handle: in protocol `>= 3` that is the
/// server-assigned id; in earlier protocols it is whatever the client
/// supplied to `RESOURCE_CREATE`.
#[derive(Debug, Default)]
pub struct Registry {
    resources: HashMap<u32, Resource>,
}

impl Registry {
    /// Creates an empty table.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a new resource.
    ///
    /// `client_supplied` is `Some(handle)` for protocol `< 3` (the client
    /// names its own handle; a collision is [`RegistryError::Exists`]) or
    /// `None` for protocol `>= 3` (the server assigns the handle, which
    /// becomes both the client- and server-visible id). Returns the
    /// client-visible handle.
    pub fn create(&mut self, ids: &mut IdAllocator, client_supplied: Option<u32>) -> Result<u32> {
        match client_supplied {
            Some(handle) => {
                if self.resources.contains_key(&handle) {
                    return Err(RegistryError::Exists);
                }
                let server_id = ids.alloc();
                self.resources.insert(handle, Resource::new(server_id, handle));
                Ok(handle)
            }
            None => {
                let server_id = ids.alloc();
                self.resources
                    .insert(server_id, Resource::new(server_id, server_id));
                Ok(server_id)
            }
        }
    }

    /// Looks up a resource by its client-visible handle.
    pub fn lookup(&self, handle: u32) -> Option<&Resource> {
        self.resources.get(&handle)
    }

    /// Mutably looks up a resource by its client-visible handle.
    pub fn lookup_mut(&mut self, handle: u32) -> Option<&mut Resource> {
        self.resources.get_mut(&handle)
    }

    /// Creates an anonymous shared-memory object of exactly `size` bytes via
    /// `shm`, maps it read-write into the server, attaches it to `handle`'s
    /// resource, and returns the fd to transfer to the client.
    pub fn attach_shm(
        &mut self,
        handle: u32,
        size: usize,
        shm: &dyn ShmProvider,
    ) -> Result<OwnedFd> {
        let resource = self
            .resources
            .get_mut(&handle)
            .ok_or(RegistryError::Invalid)?;
        if size == 0 {
            return Err(RegistryError::Invalid);
        }
        let fd = shm.create_fd("vtest-resource", size)?;
        // SAFETY: `fd` was just created and sized to `size` bytes; the
        // mapping is shared so writes through it reach the fd sent to the
        // client.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(std::io::Error::from)?;
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(RegistryError::OutOfMemory)?;
        resource.attach_iov(Iov::new(ptr, size));
        Ok(fd)
    }

    /// Removes and returns the resource for `handle`, dropping its shm
    /// mapping (if any) as part of the drop. The caller is responsible for
    /// telling the renderer to drop its iov attachment and for returning
    /// the resource's `server_id` to the shared [`IdAllocator`].
    pub fn unref(&mut self, handle: u32) -> Result<Resource> {
        self.resources.remove(&handle).ok_or(RegistryError::Invalid)
    }

    /// Drains every resource out of the table, for context teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Resource> + '_ {
        self.resources.drain().map(|(_, r)| r)
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::MemfdShmProvider;

    #[test]
    fn server_assigned_handles_equal_server_id() {
        let mut ids = IdAllocator::default();
        let mut reg = Registry::new();
        let h1 = reg.create(&mut ids, None).unwrap();
        let h2 = reg.create(&mut ids, None).unwrap();
        assert_eq!(reg.lookup(h1).unwrap().server_id(), h1);
        assert_eq!(reg.lookup(h1).unwrap().client_id(), h1);
        assert_ne!(h1, h2);
    }

    #[test]
    fn client_supplied_handle_collision_is_exists() {
        let mut ids = IdAllocator::default();
        let mut reg = Registry::new();
        reg.create(&mut ids, Some(7)).unwrap();
        let err = reg.create(&mut ids, Some(7)).unwrap_err();
        assert!(matches!(err, RegistryError::Exists));
    }

    #[test]
    fn attach_shm_maps_readable_writable_memory() {
        let mut ids = IdAllocator::default();
        let mut reg = Registry::new();
        let handle = reg.create(&mut ids, None).unwrap();
        let fd = reg.attach_shm(handle, 4096, &MemfdShmProvider).unwrap();
        drop(fd);
        let resource = reg.lookup_mut(handle).unwrap();
        let iov = resource.iov_mut().unwrap();
        iov.as_mut_slice()[0] = 0xAB;
        assert_eq!(iov.as_slice()[0], 0xAB);
        assert_eq!(iov.len(), 4096);
    }

    #[test]
    fn unref_removes_and_returns_the_resource() {
        let mut ids = IdAllocator::default();
        let mut reg = Registry::new();
        let handle = reg.create(&mut ids, None).unwrap();
        let resource = reg.unref(handle).unwrap();
        assert_eq!(resource.server_id(), handle);
        assert!(reg.lookup(handle).is_none());
        assert!(reg.unref(handle).is_err());
    }

    #[test]
    fn drain_empties_the_table_for_context_teardown() {
        let mut ids = IdAllocator::default();
        let mut reg = Registry::new();
        reg.create(&mut ids, None).unwrap();
        reg.create(&mut ids, None).unwrap();
        let drained: Vec<_> = reg.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(reg.is_empty());
    }
}
