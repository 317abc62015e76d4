use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts launched workers that have not yet finished.
///
/// Every launch takes a [`CompletionGuard`]; the guard reports completion
/// when dropped, so a worker counts as done exactly once whether it returns
/// normally or unwinds.
#[derive(Clone, Default)]
pub struct CompletionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    pending: AtomicUsize,
    notify: Notify,
}

impl fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("pending", &self.pending())
            .finish()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more outstanding worker.
    #[must_use = "dropping the guard immediately marks the worker done"]
    pub fn register(&self) -> CompletionGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        CompletionGuard {
            tracker: self.clone(),
        }
    }

    /// Workers registered and not yet done.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every registered worker is done.
    ///
    /// Returns immediately when nothing is pending. Cancel safe.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before reading the counter so a completion
            // landing in between is not missed.
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn complete(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

/// Outstanding-worker token from [`CompletionTracker::register`].
pub struct CompletionGuard {
    tracker: CompletionTracker,
}

impl fmt::Debug for CompletionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGuard").finish_non_exhaustive()
    }
}

impl CompletionGuard {
    /// Report completion now rather than at end of scope.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.tracker.complete();
    }
}
