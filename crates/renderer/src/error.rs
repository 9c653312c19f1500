use std::io;

use thiserror::Error;

/// Errors a renderer call can raise.
#[derive(Debug, Error)]
pub enum RendererError {
    /// Malformed arguments, or a handle the renderer does not recognize.
    #[error("invalid renderer arguments")]
    Invalid,
    /// The renderer could not satisfy the request (allocator exhaustion,
    /// unsupported capset, etc).
    #[error("renderer operation failed")]
    OutOfMemory,
    /// A lower-level I/O failure (blob export, poll-fd creation).
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}
