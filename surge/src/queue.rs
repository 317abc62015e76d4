use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DropReason;
use crate::request::Request;
use crate::runtime::PoolState;

/// Bounded FIFO of pending requests.
///
/// Admission never waits: a full queue drops the request. Any number of
/// workers may receive concurrently through cloned [`QueueReceiver`]s; once
/// the queue is closed and drained every receiver observes `None`.
pub struct BoundedQueue<P> {
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Request<P>>>>,
    receiver: QueueReceiver<P>,
    depth: Arc<AtomicUsize>,
}

impl<P> fmt::Debug for BoundedQueue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("depth", &self.depth())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<P> BoundedQueue<P> {
    /// Create a queue holding at most `capacity` requests (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        Self {
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: QueueReceiver {
                inner: Arc::new(tokio::sync::Mutex::new(rx)),
                depth: Arc::clone(&depth),
            },
            depth,
        }
    }

    /// Try to enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns the reason the request was dropped.
    pub fn try_push(&self, request: Request<P>) -> Result<(), DropReason> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(DropReason::Closed);
        };

        // Counted before the send so a fast receiver can never observe an
        // item the counter does not include yet.
        self.depth.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Err(match err {
                    TrySendError::Full(_) => DropReason::QueueFull,
                    TrySendError::Closed(_) => DropReason::Closed,
                })
            }
        }
    }

    /// Refuse further writes. Already queued requests stay receivable.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Requests waiting to be received, excluding those being processed.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A receiving handle sharing this queue.
    pub fn receiver(&self) -> QueueReceiver<P> {
        self.receiver.clone()
    }
}

/// Shared receiving end of a [`BoundedQueue`].
pub struct QueueReceiver<P> {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<Request<P>>>>,
    depth: Arc<AtomicUsize>,
}

impl<P> Clone for QueueReceiver<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<P> fmt::Debug for QueueReceiver<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("depth", &self.depth.load(Ordering::Acquire))
            .finish()
    }
}

impl<P> QueueReceiver<P> {
    /// Receive the next request in FIFO order.
    ///
    /// Returns `None` once the queue is closed and empty. Cancel safe: a
    /// dropped call never loses a request.
    pub async fn recv(&self) -> Option<Request<P>> {
        let request = self.inner.lock().await.recv().await;
        if request.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        request
    }
}

/// Point-in-time view of the pool for monitoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Requests waiting in the queue.
    pub queue_depth: usize,
    /// Configured queue capacity.
    pub queue_capacity: usize,
    /// Worker count as tracked by the dispatcher.
    pub live_workers: usize,
    /// Workers that have not yet reported completion.
    pub pending_workers: usize,
    /// Lifecycle state.
    pub state: PoolState,
}

impl PoolSnapshot {
    /// Queue occupancy as a fraction of capacity.
    pub fn utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queue_depth as f64 / self.queue_capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn drops_when_full_without_blocking() {
        let queue = BoundedQueue::new(3);
        let mut dropped = 0;
        for i in 0..10u32 {
            if let Err(reason) = queue.try_push(Request::new(1, i)) {
                assert_eq!(reason, DropReason::QueueFull);
                dropped += 1;
            }
            assert!(queue.depth() <= queue.capacity());
        }
        assert_eq!(queue.depth(), 3);
        assert_eq!(dropped, 7);
    }

    #[tokio::test]
    async fn receivers_share_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..4u32 {
            queue.try_push(Request::new(1, i)).expect("push");
        }

        let a = queue.receiver();
        let b = queue.receiver();
        let mut seen = Vec::new();
        for rx in [&a, &b, &a, &b] {
            let request = rx.recv().await.expect("request");
            seen.push(**request.payload());
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn close_rejects_writes_but_drains_reads() {
        let queue = BoundedQueue::new(4);
        queue.try_push(Request::new(1, "kept")).expect("push");

        assert!(queue.close());
        assert!(!queue.close());
        assert_eq!(
            queue.try_push(Request::new(1, "late")),
            Err(DropReason::Closed)
        );

        let rx = queue.receiver();
        let request = rx.recv().await.expect("queued request survives close");
        assert_eq!(**request.payload(), "kept");

        let end = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("closed queue must not block");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn cancelled_recv_loses_nothing() {
        let queue = BoundedQueue::<u32>::new(2);
        let rx = queue.receiver();

        let pending = timeout(Duration::from_millis(10), rx.recv()).await;
        assert!(pending.is_err());

        queue.try_push(Request::new(1, 9)).expect("push");
        let request = rx.recv().await.expect("request");
        assert_eq!(**request.payload(), 9);
    }

    #[test]
    fn snapshot_utilization() {
        let snapshot = PoolSnapshot {
            sampled_at: Utc::now(),
            queue_depth: 25,
            queue_capacity: 100,
            live_workers: 2,
            pending_workers: 2,
            state: PoolState::Running,
        };
        assert!((snapshot.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
