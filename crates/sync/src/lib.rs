#![deny(missing_docs)]

//! The timeline-synchronization subsystem:
//!
//! - [`timeline`]: reference-counted 64-bit monotonic timelines ("syncs").
//! - [`queue`]: per-context ordered sync queues that release timeline bumps
//!   in submission order, gated on renderer fence completion.
//! - [`wait`]: registered waits over (timeline, threshold) sets with
//!   ANY/ALL semantics, timeouts, and fd notification.

mod error;
mod id_alloc;
mod queue;
mod timeline;
mod wait;

pub use error::SyncError;
pub use id_alloc::IdAllocator;
pub use queue::{SyncQueue, SyncQueueBank, SyncQueueSubmit};
pub use timeline::{SyncHandle, SyncInner, TimelineStore};
pub use wait::{register_wait, signal_sync, RegisterOutcome, SyncWait, SyncWaitFlags, SyncWaitList};

/// Result type used throughout the sync subsystem.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Number of sync queues carried per context.
pub const QUEUES_PER_CONTEXT: usize = 64;
