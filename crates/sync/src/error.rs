use std::io;

use thiserror::Error;

/// Errors raised by the sync subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A referenced sync id was not found in the context's table.
    #[error("unknown or duplicate sync id")]
    Exists,
    /// Malformed arguments: out-of-range queue index, overflowing offsets.
    #[error("invalid sync arguments")]
    Invalid,
    /// The host could not provide a notification primitive (eventfd/pipe).
    #[error("no notification device available")]
    NoDevice,
    /// A lower-level I/O failure.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}
