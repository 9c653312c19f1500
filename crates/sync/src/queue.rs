use std::collections::VecDeque;

use crate::timeline::SyncHandle;

/// A pending batch of timeline bumps gated on one renderer fence.
///
/// Holds strong references to every timeline it will bump, so a timeline
/// cannot be fully unreffed out from under an in-flight submit.
#[derive(Debug)]
pub struct SyncQueueSubmit {
    bumps: Vec<(SyncHandle, u64)>,
}

impl SyncQueueSubmit {
    /// Builds a submit from `(timeline, new value)` pairs.
    pub fn new(bumps: Vec<(SyncHandle, u64)>) -> Self {
        SyncQueueSubmit { bumps }
    }

    /// The timeline bumps this submit will apply on completion.
    pub fn bumps(&self) -> &[(SyncHandle, u64)] {
        &self.bumps
    }
}

/// A FIFO of pending [`SyncQueueSubmit`]s for one `(context, queue_index)`
/// pair.
///
/// Completion is identified by an opaque cookie handed to the renderer as
/// `context_create_fence`'s `user_cookie` and returned verbatim in the
/// fence-complete callback, rather than by comparing raw pointer identity
/// (which risks reading a pointer after the entry behind it has already
/// been freed). Looking a cookie up and finding nothing means it was
/// already drained by an earlier, later-queued completion.
#[derive(Debug, Default)]
pub struct SyncQueue {
    entries: VecDeque<(u64, SyncQueueSubmit)>,
    next_cookie: u64,
}

impl SyncQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        SyncQueue::default()
    }

    /// Appends `submit` to the tail of the queue and returns the cookie to
    /// pass to `context_create_fence`.
    pub fn push(&mut self, submit: SyncQueueSubmit) -> u64 {
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        self.entries.push_back((cookie, submit));
        cookie
    }

    /// Pops every entry up to and including the one tagged `cookie`, in
    /// FIFO order. Returns an empty vec if `cookie` is not present — it was
    /// already absorbed by an earlier completion that drained past it.
    pub fn complete_up_to(&mut self, cookie: u64) -> Vec<SyncQueueSubmit> {
        let Some(pos) = self.entries.iter().position(|(c, _)| *c == cookie) else {
            return Vec::new();
        };
        self.entries.drain(..=pos).map(|(_, s)| s).collect()
    }

    /// Number of submits currently queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue has no pending submits.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains every pending submit without signaling, for context teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = SyncQueueSubmit> + '_ {
        self.entries.drain(..).map(|(_, s)| s)
    }
}

/// The 64 sync queues carried per context.
pub struct SyncQueueBank {
    queues: [SyncQueue; crate::QUEUES_PER_CONTEXT],
}

impl SyncQueueBank {
    /// Creates a bank of 64 empty queues.
    pub fn new() -> Self {
        SyncQueueBank {
            queues: std::array::from_fn(|_| SyncQueue::new()),
        }
    }

    /// Accesses queue `index`, or `None` if out of `[0, 64)`.
    pub fn get(&self, index: usize) -> Option<&SyncQueue> {
        self.queues.get(index)
    }

    /// Mutably accesses queue `index`, or `None` if out of `[0, 64)`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut SyncQueue> {
        self.queues.get_mut(index)
    }

    /// Drains every queue in the bank without signaling, for context
    /// teardown.
    pub fn drain_all(&mut self) {
        for q in &mut self.queues {
            q.drain().for_each(drop);
        }
    }
}

impl Default for SyncQueueBank {
    fn default() -> Self {
        Self::new()
    }
}
