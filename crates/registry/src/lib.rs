#![deny(missing_docs)]

//! Per-context resource table: the mapping from client-visible handles to
//! renderer-side resource records, and the shared-memory mapping discipline
//! for resources backed by an `iov`.
//!
//! Server-side resource ids are allocated from a single process-wide
//! [`IdAllocator`] shared by every context, so ids stay globally unique and
//! are recycled through a free list rather than growing without bound.

mod error;
mod id_alloc;
mod resource;
mod shm;
mod table;

pub use error::RegistryError;
pub use id_alloc::IdAllocator;
pub use resource::{Iov, Resource};
pub use shm::{MemfdShmProvider, ShmProvider};
pub use table::Registry;

/// Result type used throughout the resource registry.
pub type Result<T> = std::result::Result<T, RegistryError>;
