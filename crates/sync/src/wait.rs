use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustix::event::EventfdFlags;

use crate::error::SyncError;
use crate::timeline::{SyncHandle, TimelineStore};
use crate::Result;

/// Sync-wait flags: bit 0 selects ANY semantics (wake on the first
/// threshold crossing); otherwise every threshold must cross before the
/// wait resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWaitFlags(u32);

impl SyncWaitFlags {
    /// Wake as soon as any one threshold crosses, rather than all of them.
    pub const ANY: u32 = 1 << 0;

    /// Builds flags from the raw wire value.
    pub fn from_bits(bits: u32) -> Self {
        SyncWaitFlags(bits)
    }

    /// The raw wire value.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether ANY semantics are requested.
    pub fn is_any(&self) -> bool {
        self.0 & Self::ANY != 0
    }
}

/// A registered wait over a set of `(timeline, threshold)` crossings.
#[derive(Debug)]
pub struct SyncWait {
    notify_fd: OwnedFd,
    flags: SyncWaitFlags,
    deadline: Option<Instant>,
    remaining: Vec<Option<(SyncHandle, u64)>>,
    signaled_count: usize,
    sync_count: usize,
}

impl SyncWait {
    /// Whether this wait's deadline has elapsed as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d < now)
    }

    /// Number of distinct `(timeline, threshold)` inputs this wait covers.
    pub fn sync_count(&self) -> usize {
        self.sync_count
    }

    /// Number of inputs that have crossed their threshold so far.
    pub fn signaled_count(&self) -> usize {
        self.signaled_count
    }
}

/// The outcome of [`register_wait`].
pub struct RegisterOutcome {
    /// The fd to transfer to the client via `SCM_RIGHTS`.
    pub client_fd: OwnedFd,
    /// `Some` if the wait was not immediately resolved and must be appended
    /// to the owning context's wait list; `None` if it resolved on the spot
    /// (and was notified) or the client passed `timeout_ms == 0` and chose
    /// not to block.
    pub pending: Option<SyncWait>,
}

fn notify(fd: &OwnedFd) {
    let token = 1u64.to_ne_bytes();
    if let Err(err) = rustix::io::write(fd, &token) {
        tracing::debug!(%err, "wait notification write failed (fd likely edge-triggered already)");
    }
}

/// Creates an event-style notification fd pair: one kept server-side for
/// writing the resolution token, one duplicate to hand to the client.
/// Falls back to reporting [`SyncError::NoDevice`] if the host has no
/// eventfd primitive.
fn new_notifier() -> Result<(OwnedFd, OwnedFd)> {
    let keep = rustix::event::eventfd(0, EventfdFlags::NONBLOCK | EventfdFlags::CLOEXEC)
        .map_err(|_| SyncError::NoDevice)?;
    let client = rustix::io::dup(&keep).map_err(|e| SyncError::Io(e.into()))?;
    Ok((keep, client))
}

/// The largest `timeout_ms` treated as finite; above this the wait never
/// expires.
const MAX_FINITE_TIMEOUT_MS: u64 = i32::MAX as u64;

/// Registers a wait over `thresholds`: resolves immediately if already
/// satisfied or if `timeout_ms == 0`, otherwise returns a pending wait for
/// the caller to append to the owning context's wait list.
pub fn register_wait(
    timelines: &TimelineStore,
    flags: SyncWaitFlags,
    timeout_ms: u64,
    thresholds: &[(u32, u64)],
    now: Instant,
) -> Result<RegisterOutcome> {
    let (keep, client_fd) = new_notifier()?;

    let deadline = (timeout_ms <= MAX_FINITE_TIMEOUT_MS)
        .then(|| now + Duration::from_millis(timeout_ms));

    let mut remaining = Vec::with_capacity(thresholds.len());
    let mut signaled_count = 0usize;
    for &(sync_id, threshold) in thresholds {
        let handle = timelines.lookup(sync_id).ok_or(SyncError::Exists)?;
        if handle.value() >= threshold {
            signaled_count += 1;
        } else {
            remaining.push(Some((handle, threshold)));
        }
    }
    let sync_count = thresholds.len();

    let ready = remaining.is_empty() || (flags.is_any() && signaled_count > 0);
    if ready {
        notify(&keep);
        return Ok(RegisterOutcome {
            client_fd,
            pending: None,
        });
    }
    if timeout_ms == 0 {
        return Ok(RegisterOutcome {
            client_fd,
            pending: None,
        });
    }
    Ok(RegisterOutcome {
        client_fd,
        pending: Some(SyncWait {
            notify_fd: keep,
            flags,
            deadline,
            remaining,
            signaled_count,
            sync_count,
        }),
    })
}

/// One context's list of pending waits.
#[derive(Debug, Default)]
pub struct SyncWaitList {
    waits: Vec<SyncWait>,
}

impl SyncWaitList {
    /// Creates an empty list.
    pub fn new() -> Self {
        SyncWaitList::default()
    }

    /// Appends a pending wait.
    pub fn push(&mut self, wait: SyncWait) {
        self.waits.push(wait);
    }

    /// Number of pending waits.
    pub fn len(&self) -> usize {
        self.waits.len()
    }

    /// Whether there are no pending waits.
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// Drops every pending wait without notifying, closing their fds.
    pub fn close_all(&mut self) {
        self.waits.clear();
    }
}

/// Applies a timeline write: updates `sync`'s value if it is a genuine
/// increase, then walks every context's wait list, garbage-collecting
/// expired waits and resolving/notifying any wait whose condition is now
/// satisfied.
///
/// A `value` that does not exceed the current one is treated as a pure
/// no-op — no value mutation, no wakeups. This keeps "after a write, value
/// equals the written amount" true exactly when the write was an increase.
pub fn signal_sync<'a>(
    sync: &SyncHandle,
    value: u64,
    lists: impl IntoIterator<Item = &'a mut SyncWaitList>,
    now: Instant,
) {
    if value <= sync.value() {
        return;
    }
    sync.set_value(value);

    for list in lists {
        list.waits.retain_mut(|wait| {
            if wait.is_expired(now) {
                return false;
            }
            for slot in wait.remaining.iter_mut() {
                let crosses = slot
                    .as_ref()
                    .is_some_and(|(s, threshold)| Arc::ptr_eq(s, sync) && *threshold <= value);
                if crosses {
                    *slot = None;
                    wait.signaled_count += 1;
                }
            }
            let all_resolved = wait.remaining.iter().all(Option::is_none);
            let ready = all_resolved || (wait.flags.is_any() && wait.signaled_count > 0);
            if ready {
                notify(&wait.notify_fd);
            }
            !ready
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_alloc::IdAllocator;
    use rustix::io::Errno;

    fn is_readable(fd: &OwnedFd) -> bool {
        let mut buf = [0u8; 8];
        match rustix::io::read(fd, &mut buf) {
            Ok(n) => n == 8,
            Err(Errno::AGAIN) => false,
            Err(e) => panic!("unexpected error reading notify fd: {e}"),
        }
    }

    #[test]
    fn pre_signaled_wait_resolves_without_being_retained() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s = store.create(&ids, 7);

        let outcome =
            register_wait(&store, SyncWaitFlags::from_bits(0), 0, &[(s.id(), 5)], Instant::now())
                .unwrap();
        assert!(outcome.pending.is_none());
        assert!(is_readable(&outcome.client_fd));
    }

    #[test]
    fn any_mode_wakes_on_first_crossing() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s1 = store.create(&ids, 0);
        let s2 = store.create(&ids, 0);

        let outcome = register_wait(
            &store,
            SyncWaitFlags::from_bits(SyncWaitFlags::ANY),
            60_000,
            &[(s1.id(), 1), (s2.id(), 1)],
            Instant::now(),
        )
        .unwrap();
        let mut wait = outcome.pending.expect("not pre-signaled");
        assert!(!is_readable(&outcome.client_fd));

        let mut list = SyncWaitList::new();
        list.push(
            std::mem::replace(
                &mut wait,
                SyncWait {
                    notify_fd: rustix::io::dup(&outcome.client_fd).unwrap(),
                    flags: SyncWaitFlags::from_bits(0),
                    deadline: None,
                    remaining: Vec::new(),
                    signaled_count: 0,
                    sync_count: 0,
                },
            ),
        );
        signal_sync(&s2, 1, [&mut list], Instant::now());
        assert!(list.is_empty());
        assert!(is_readable(&outcome.client_fd));
    }

    #[test]
    fn all_mode_requires_every_threshold() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s1 = store.create(&ids, 0);
        let s2 = store.create(&ids, 0);

        let outcome = register_wait(
            &store,
            SyncWaitFlags::from_bits(0),
            60_000,
            &[(s1.id(), 1), (s2.id(), 1)],
            Instant::now(),
        )
        .unwrap();
        let wait = outcome.pending.expect("not pre-signaled");
        let mut list = SyncWaitList::new();
        list.push(wait);

        signal_sync(&s1, 1, [&mut list], Instant::now());
        assert_eq!(list.len(), 1, "still waiting on s2");
        assert!(!is_readable(&outcome.client_fd));

        signal_sync(&s2, 1, [&mut list], Instant::now());
        assert!(list.is_empty());
        assert!(is_readable(&outcome.client_fd));
    }

    #[test]
    fn non_increasing_write_is_a_no_op() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s = store.create(&ids, 10);
        let mut list = SyncWaitList::new();
        signal_sync(&s, 10, [&mut list], Instant::now());
        assert_eq!(s.value(), 10);
        signal_sync(&s, 3, [&mut list], Instant::now());
        assert_eq!(s.value(), 10);
    }

    #[test]
    fn expired_wait_is_garbage_collected_on_next_signal() {
        let ids = IdAllocator::default();
        let mut store = TimelineStore::new();
        let s1 = store.create(&ids, 0);
        let s2 = store.create(&ids, 0);

        let past = Instant::now();
        let outcome = register_wait(
            &store,
            SyncWaitFlags::from_bits(0),
            1,
            &[(s1.id(), 1)],
            past,
        )
        .unwrap();
        let wait = outcome.pending.unwrap();
        let mut list = SyncWaitList::new();
        list.push(wait);

        let later = past + Duration::from_secs(5);
        signal_sync(&s2, 1, [&mut list], later);
        assert!(list.is_empty(), "expired wait should be collected even though s2 isn't what it waited on");
    }
}
