use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{DropReason, PoolError};
use crate::request::{RequestId, RequestKind};
use crate::runtime::{ScaleDecision, ShutdownOutcome, WorkerExit, WorkerId};

/// Metadata envelope attached to every pool event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool event with metadata and payload.
#[derive(Clone, Debug)]
pub struct PoolEvent {
    pub meta: EventMeta,
    pub payload: PoolEventPayload,
}

impl PoolEvent {
    pub fn new(payload: PoolEventPayload) -> Self {
        Self {
            meta: EventMeta::new(),
            payload,
        }
    }
}

/// Lifecycle transitions observable on the event bus.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PoolEventPayload {
    /// Request accepted into the queue.
    Enqueued {
        request_id: RequestId,
        kind: RequestKind,
    },
    /// Request refused at admission.
    Dropped {
        request_id: RequestId,
        kind: RequestKind,
        reason: DropReason,
    },
    /// One attempt failed or timed out.
    AttemptFailed {
        request_id: RequestId,
        kind: RequestKind,
        worker_id: WorkerId,
        attempt: u32,
        error: PoolError,
    },
    /// Handler reported success.
    Completed {
        request_id: RequestId,
        kind: RequestKind,
        worker_id: WorkerId,
        attempts: u32,
    },
    /// Request dropped after processing began (no handler or retries exhausted).
    Discarded {
        request_id: RequestId,
        kind: RequestKind,
        worker_id: WorkerId,
        error: PoolError,
    },
    WorkerStarted {
        worker_id: WorkerId,
        live_workers: usize,
    },
    WorkerStopped {
        worker_id: WorkerId,
        exit: WorkerExit,
    },
    /// The scaling controller added or removed a worker.
    Scaled {
        decision: ScaleDecision,
        live_workers: usize,
        queue_depth: usize,
    },
    ShutdownStarted {
        deadline: Duration,
    },
    ShutdownFinished {
        outcome: ShutdownOutcome,
    },
}

/// Sink for pool events.
///
/// Publishing never blocks and never fails the caller; the pool keeps
/// running whether or not anyone listens.
pub trait PoolEventPublisher: Send + Sync {
    fn publish(&self, event: PoolEvent);

    /// Subscribe to events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<PoolEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Fan-out to every subscriber. A subscriber that falls more than
/// `capacity` events behind receives `RecvError::Lagged` and skips ahead;
/// publishers never wait for slow subscribers.
///
/// ```ignore
/// let bus = PoolEventBus::new(256);
/// let mut rx = bus.subscribe();
/// ```
pub struct PoolEventBus {
    sender: broadcast::Sender<PoolEvent>,
    capacity: usize,
}

impl std::fmt::Debug for PoolEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl PoolEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PoolEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PoolEventPublisher for PoolEventBus {
    fn publish(&self, event: PoolEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}
