#![deny(missing_docs)]

//! The command dispatcher and process-wide state that ties the resource
//! registry, timeline store, and renderer adapter into one
//! connection-serving core.

mod context;
mod dispatch;
mod error;
mod opcode;
mod shared;
mod transfer;

pub use context::Context;
pub use dispatch::Dispatcher;
pub use error::VtestError;
pub use opcode::{Opcode, Param};
pub use shared::{Core, CoreConfig};

/// Result type used throughout this crate.
pub type Result<T> = error::Result<T>;
