use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::PoolError;
use crate::events::{PoolEvent, PoolEventPayload, PoolEventPublisher};
use crate::handler::{HandlerOutcome, HandlerRegistry, RequestHandler};
use crate::queue::QueueReceiver;
use crate::request::{Payload, Request};
use crate::telemetry;

use super::completion::CompletionGuard;
use super::signal::StopSignal;

/// Configuration shared by every worker in a pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Per-attempt timeout for requests that do not carry their own, in milliseconds.
    pub default_timeout_ms: u64,
    /// Yield to the scheduler after each request.
    pub yield_between_requests: bool,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default per-attempt timeout.
    pub fn with_default_timeout(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    pub fn with_yield_between_requests(mut self, enabled: bool) -> Self {
        self.yield_between_requests = enabled;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10,
            yield_between_requests: true,
        }
    }
}

/// Identifier assigned to a worker at launch. Unique within a pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Why a worker loop returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkerExit {
    /// The queue was closed and fully drained.
    QueueClosed,
    /// The worker consumed a stop token.
    StopSignal,
}

/// Channels a launched worker runs against.
pub struct WorkerLanes<P> {
    pub queue: QueueReceiver<P>,
    pub stop: StopSignal,
    pub completion: CompletionGuard,
}

impl<P> fmt::Debug for WorkerLanes<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLanes")
            .field("queue", &self.queue)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

/// Something the dispatcher can launch as a worker.
///
/// `launch` must return without waiting and run the worker concurrently. The
/// worker owns `lanes.completion` and must keep it alive until it has
/// stopped receiving; dropping it is how the pool learns the worker is done.
pub trait WorkerLauncher<P: Payload>: Send + 'static {
    fn id(&self) -> WorkerId;

    fn launch(self, lanes: WorkerLanes<P>);
}

/// How processing of one request ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Processed {
    /// The handler succeeded on attempt number `attempts`.
    Completed { attempts: u32 },
    /// The request was dropped after processing began.
    Discarded(PoolError),
}

/// Standard worker: pulls requests, looks up the handler, runs attempts.
pub struct Worker<P: Payload> {
    id: WorkerId,
    registry: Arc<HandlerRegistry<P>>,
    config: WorkerConfig,
    events: Arc<dyn PoolEventPublisher>,
}

impl<P: Payload> fmt::Debug for Worker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl<P: Payload> WorkerLauncher<P> for Worker<P> {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn launch(self, lanes: WorkerLanes<P>) {
        let WorkerLanes {
            queue,
            stop,
            completion,
        } = lanes;

        tokio::spawn(async move {
            // Dropped last, after the stop event is out.
            let _completion = completion;

            let exit = self.run(&queue, &stop).await;
            tracing::debug!(worker = %self.id, exit = ?exit, "worker stopped");
            self.events.publish(PoolEvent::new(PoolEventPayload::WorkerStopped {
                worker_id: self.id,
                exit,
            }));
        });
    }
}

impl<P: Payload> Worker<P> {
    pub fn new(
        id: WorkerId,
        registry: Arc<HandlerRegistry<P>>,
        config: WorkerConfig,
        events: Arc<dyn PoolEventPublisher>,
    ) -> Self {
        Self {
            id,
            registry,
            config,
            events,
        }
    }

    async fn run(&self, queue: &QueueReceiver<P>, stop: &StopSignal) -> WorkerExit {
        loop {
            let request = tokio::select! {
                biased;
                () = stop.recv() => return WorkerExit::StopSignal,
                request = queue.recv() => match request {
                    Some(request) => request,
                    None => return WorkerExit::QueueClosed,
                },
            };

            let (request_id, kind) = (request.id(), request.kind());
            telemetry::instrument_process(self.id, request_id, kind, self.process(request)).await;

            if self.config.yield_between_requests {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Run one request to its terminal outcome.
    pub(crate) async fn process(&self, mut request: Request<P>) -> Processed {
        let timing = telemetry::record_request_start(request.id());
        let kind = request.kind();

        let Some(handler) = self.registry.get(kind) else {
            let error = PoolError::HandlerNotFound { kind };
            tracing::warn!(request_id = %request.id(), %error, "discarding request");
            self.discard(&request, error.clone());
            telemetry::record_request_end(timing, kind, error.label());
            return Processed::Discarded(error);
        };

        let timeout = request
            .timeout()
            .unwrap_or_else(|| self.config.default_timeout());
        let max_attempts = request.max_attempts();

        for attempt in 0..max_attempts {
            let error = match self.attempt(&handler, &request, attempt, timeout).await {
                Ok(()) => {
                    telemetry::record_attempt(kind, "success");
                    self.events.publish(PoolEvent::new(PoolEventPayload::Completed {
                        request_id: request.id(),
                        kind,
                        worker_id: self.id,
                        attempts: attempt + 1,
                    }));
                    telemetry::record_request_end(timing, kind, "success");
                    return Processed::Completed {
                        attempts: attempt + 1,
                    };
                }
                Err(error) => error,
            };

            tracing::warn!(
                request_id = %request.id(),
                attempt,
                retries = request.retries(),
                max_retries = request.max_retries(),
                %error,
                "attempt failed"
            );
            telemetry::record_attempt(kind, error.label());
            self.events.publish(PoolEvent::new(PoolEventPayload::AttemptFailed {
                request_id: request.id(),
                kind,
                worker_id: self.id,
                attempt,
                error,
            }));

            if attempt + 1 < max_attempts {
                request.record_retry();
            }
        }

        let error = PoolError::RetriesExhausted {
            attempts: max_attempts,
        };
        tracing::warn!(request_id = %request.id(), %error, "discarding request");
        self.discard(&request, error.clone());
        telemetry::record_request_end(timing, kind, error.label());
        Processed::Discarded(error)
    }

    /// One handler run bounded by `timeout`.
    ///
    /// The handler runs in its own task. On timeout the task is abandoned,
    /// not cancelled: it keeps running and its outcome is ignored.
    async fn attempt(
        &self,
        handler: &Arc<dyn RequestHandler<P>>,
        request: &Request<P>,
        attempt: u32,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let handler = Arc::clone(handler);
        let payload = Arc::clone(request.payload());
        let task = tokio::spawn(
            async move { handler.handle(payload).await }
                .instrument(telemetry::attempt_span(request.id(), attempt)),
        );

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(HandlerOutcome::Success)) => Ok(()),
            Ok(Ok(HandlerOutcome::Failure { error })) => Err(PoolError::HandlerFailed {
                attempt,
                message: error.unwrap_or_else(|| "handler reported failure".to_string()),
            }),
            Ok(Err(join_error)) => Err(PoolError::HandlerFailed {
                attempt,
                message: if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    "handler task cancelled".to_string()
                },
            }),
            Err(_elapsed) => Err(PoolError::AttemptTimedOut { attempt, timeout }),
        }
    }

    fn discard(&self, request: &Request<P>, error: PoolError) {
        self.events.publish(PoolEvent::new(PoolEventPayload::Discarded {
            request_id: request.id(),
            kind: request.kind(),
            worker_id: self.id,
            error,
        }));
    }
}
