use std::ffi::CString;
use std::io;
use std::os::fd::OwnedFd;

/// The shared-memory file creation primitive: given a name and size,
/// produces an fd. Treated as an external collaborator so the registry can
/// be exercised against a fake in unit tests without touching the real
/// kernel primitive's quirks.
pub trait ShmProvider {
    /// Creates an anonymous shared-memory object of exactly `size` bytes and
    /// returns an fd referencing it, sized and truncated, ready to be
    /// `mmap`'d.
    fn create_fd(&self, name: &str, size: usize) -> io::Result<OwnedFd>;
}

/// The real primitive: Linux `memfd_create` + `ftruncate`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemfdShmProvider;

impl ShmProvider for MemfdShmProvider {
    fn create_fd(&self, name: &str, size: usize) -> io::Result<OwnedFd> {
        let cname = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)
            .map_err(io::Error::from)?;
        rustix::fs::ftruncate(&fd, size as u64).map_err(io::Error::from)?;
        Ok(fd)
    }
}
