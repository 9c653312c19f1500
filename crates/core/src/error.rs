use std::io;

use thiserror::Error;

/// The aggregate error type for the dispatcher.
///
/// Every variant but [`VtestError::ShortRead`] and [`VtestError::Io`] is
/// recoverable at the command boundary: the dispatcher replies with a
/// negative status (where the wire format has one) or simply refuses to
/// perform the requested mutation. `ShortRead` and `Io` are connection-fatal.
#[derive(Debug, Error)]
pub enum VtestError {
    /// The peer closed the connection or sent a truncated frame.
    #[error("short read: peer closed or truncated frame")]
    ShortRead,
    /// Malformed arguments, bad offsets, or a call forbidden in the current
    /// protocol/negotiation state.
    #[error("invalid request")]
    Invalid,
    /// A duplicate or missing handle (resource or sync id).
    #[error("unknown or duplicate handle")]
    Exists,
    /// Allocator exhaustion in the registry or renderer.
    #[error("out of memory")]
    OutOfMemory,
    /// Event-fd (or fallback) creation failed.
    #[error("no notification device available")]
    NoDevice,
    /// A transfer's offset/length ran past the resource's backing store.
    #[error("transfer out of bounds")]
    Fault,
    /// An unrecognized opcode; fatal for the connection.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    /// A lower-level I/O failure.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

impl From<vtest_proto::ProtoError> for VtestError {
    fn from(err: vtest_proto::ProtoError) -> Self {
        match err {
            vtest_proto::ProtoError::Short => VtestError::ShortRead,
            vtest_proto::ProtoError::Io(e) => VtestError::Io(e),
        }
    }
}

impl From<vtest_registry::RegistryError> for VtestError {
    fn from(err: vtest_registry::RegistryError) -> Self {
        match err {
            vtest_registry::RegistryError::Exists => VtestError::Exists,
            vtest_registry::RegistryError::Invalid => VtestError::Invalid,
            vtest_registry::RegistryError::OutOfMemory => VtestError::OutOfMemory,
            vtest_registry::RegistryError::Io(e) => VtestError::Io(e),
        }
    }
}

impl From<vtest_sync::SyncError> for VtestError {
    fn from(err: vtest_sync::SyncError) -> Self {
        match err {
            vtest_sync::SyncError::Exists => VtestError::Exists,
            vtest_sync::SyncError::Invalid => VtestError::Invalid,
            vtest_sync::SyncError::NoDevice => VtestError::NoDevice,
            vtest_sync::SyncError::Io(e) => VtestError::Io(e),
        }
    }
}

impl From<vtest_renderer::RendererError> for VtestError {
    fn from(err: vtest_renderer::RendererError) -> Self {
        tracing::warn!(%err, "renderer call failed");
        match err {
            vtest_renderer::RendererError::Io(e) => VtestError::Io(e),
            _ => VtestError::Invalid,
        }
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, VtestError>;
