#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Wire codec for the vtest command-dispatch protocol.
//!
//! Frames are little-endian 32-bit words: a 2-word header (`length_dw`,
//! `cmd_id`) followed by `length_dw` payload words. Some responses carry a
//! single file descriptor out-of-band via `SCM_RIGHTS`, associated with the
//! frame that was written immediately before it.

mod codec;
mod error;
mod fd;

pub use codec::{FrameHeader, FrameReader, FrameWriter, VTEST_SAVE_ENV};
pub use error::ProtoError;
pub use fd::{recv_fd, send_fd};

/// Result type used throughout the wire codec.
pub type Result<T> = std::result::Result<T, ProtoError>;
