use std::sync::atomic::{AtomicU32, Ordering};

/// The legacy global busy-wait counter.
///
/// Every `SUBMIT_CMD` bumps `submitted` and tags a renderer fence with the
/// new value; the fence-complete callback reports it back via
/// `mark_completed`. `RESOURCE_BUSY_WAIT` just compares the two.
#[derive(Debug, Default)]
pub struct ImplicitFenceCounter {
    submitted: AtomicU32,
    completed: AtomicU32,
}

impl ImplicitFenceCounter {
    /// Creates a counter with both values at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps and returns the new `submitted` value, to tag the fence the
    /// caller is about to create.
    pub fn next_submitted(&self) -> u32 {
        self.submitted.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records that `fence_id` completed. Out-of-order callbacks (a lower
    /// id arriving after a higher one already completed) are ignored to
    /// preserve `implicit_fence_completed`'s monotonicity invariant.
    pub fn mark_completed(&self, fence_id: u32) {
        self.completed.fetch_max(fence_id, Ordering::AcqRel);
    }

    /// Whether any submitted fence has not yet completed.
    pub fn is_busy(&self) -> bool {
        self.submitted.load(Ordering::Acquire) != self.completed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_until_completion_matches_submission() {
        let counter = ImplicitFenceCounter::new();
        let id = counter.next_submitted();
        assert!(counter.is_busy());
        counter.mark_completed(id);
        assert!(!counter.is_busy());
    }

    #[test]
    fn out_of_order_completion_does_not_regress() {
        let counter = ImplicitFenceCounter::new();
        let _first = counter.next_submitted();
        let second = counter.next_submitted();
        counter.mark_completed(second);
        counter.mark_completed(1);
        assert!(!counter.is_busy(), "completed must not regress below the higher id already seen");
    }
}
