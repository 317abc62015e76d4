use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

/// Token for signalling cancellation to background tasks.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Counted stop tokens shared by every worker.
///
/// Each released token stops exactly one idle worker; tokens accumulate
/// while every worker is busy and are picked up at the next idle point.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tokens: Arc<Semaphore>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(Semaphore::new(0)),
        }
    }

    /// Release `count` stop tokens.
    pub fn release(&self, count: usize) {
        if count > 0 {
            self.tokens.add_permits(count);
        }
    }

    /// Tokens released and not yet taken by a worker.
    pub fn outstanding(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Wait for and consume one stop token. Cancel safe.
    pub async fn recv(&self) {
        // The semaphore is never closed, so the error arm is unreachable in
        // practice; treat it as a stop all the same.
        if let Ok(permit) = self.tokens.acquire().await {
            permit.forget();
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_token_shared_state() {
        let token = ShutdownToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();

        token.cancel();

        assert!(clone1.is_cancelled());
        assert!(clone2.is_cancelled());

        timeout(Duration::from_secs(1), clone1.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_token_cancelled_wakes_clones() {
        let token = ShutdownToken::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let clone = token.clone();
                tokio::spawn(async move { clone.cancelled().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let results = timeout(Duration::from_secs(5), futures::future::join_all(handles))
            .await
            .expect("waiters did not observe cancellation within 5 seconds");
        for r in results {
            r.expect("waiter task panicked");
        }
    }

    #[tokio::test]
    async fn test_shutdown_token_default_not_cancelled() {
        let token = ShutdownToken::default();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_each_stop_token_is_consumed_once() {
        let stop = StopSignal::new();
        stop.release(2);
        assert_eq!(stop.outstanding(), 2);

        timeout(Duration::from_secs(1), stop.recv()).await.unwrap();
        timeout(Duration::from_secs(1), stop.recv()).await.unwrap();
        assert_eq!(stop.outstanding(), 0);

        assert!(timeout(Duration::from_millis(20), stop.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_token_wakes_one_waiter() {
        let stop = StopSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let stop = stop.clone();
                tokio::spawn(async move { stop.recv().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        stop.release(1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let finished = waiters.iter().filter(|h| h.is_finished()).count();
        assert_eq!(finished, 1);
        for handle in waiters {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_release_zero_is_noop() {
        let stop = StopSignal::new();
        stop.release(0);
        assert_eq!(stop.outstanding(), 0);
    }
}
