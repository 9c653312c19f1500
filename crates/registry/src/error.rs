use std::io;

use thiserror::Error;

/// Errors raised by resource-registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A client-supplied handle collided with one already live (protocol
    /// `<3`) or is illegal in the negotiated protocol (`>=3` must let the
    /// server assign handles).
    #[error("duplicate or invalid resource handle")]
    Exists,
    /// A malformed handle, offset, or length.
    #[error("invalid resource arguments")]
    Invalid,
    /// The id allocator or shared-memory backing could not be satisfied.
    #[error("out of memory")]
    OutOfMemory,
    /// A lower-level I/O failure (mmap, memfd_create, ...).
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}
