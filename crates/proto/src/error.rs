use std::io;

use thiserror::Error;

/// Errors raised while reading or writing frames on the wire.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The peer closed the connection, or sent fewer bytes than a frame
    /// requires. Fatal for the connection.
    #[error("short read: peer closed or truncated frame")]
    Short,
    /// A hard I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}
