#![deny(missing_docs)]

//! The renderer adapter: a thin trait over the opaque GPU rendering
//! library the dispatcher drives, plus the legacy implicit-fence
//! bookkeeping that exists purely for old busy-wait clients.
//!
//! Everything in this crate is deliberately dumb. The interesting state
//! (timelines, queues, waits, resources) lives in `vtest-sync` and
//! `vtest-registry`; this crate only describes the shape of the calls a
//! real rendering library would need to answer and the callbacks it fires
//! back into the dispatcher.

mod error;
mod implicit;
mod mock;
mod traits;

pub use error::RendererError;
pub use implicit::ImplicitFenceCounter;
pub use mock::MockRenderer;
pub use traits::{BlobArgs, FenceSink, Renderer, ResourceCreateArgs};

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, RendererError>;
