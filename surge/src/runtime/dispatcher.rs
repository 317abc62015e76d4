use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::PoolConfig;
use crate::error::{DropReason, PoolError};
use crate::events::{PoolEvent, PoolEventPayload, PoolEventPublisher};
use crate::handler::HandlerRegistry;
use crate::queue::{BoundedQueue, PoolSnapshot};
use crate::request::{Payload, Request, RequestId};
use crate::telemetry;

use super::builder::PoolBuilder;
use super::completion::CompletionTracker;
use super::scaler::{ScaleDecision, ScaleTarget, ScalerHandle, ScalingPolicy};
use super::signal::StopSignal;
use super::worker::{Worker, WorkerId, WorkerLanes, WorkerLauncher};

/// Lifecycle of a pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PoolState {
    /// Accepting submissions.
    Running,
    /// `stop` is in progress; submissions are dropped.
    Draining,
    /// Every worker has finished.
    Stopped,
}

/// How `stop` ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ShutdownOutcome {
    /// All workers finished before the deadline.
    Drained,
    /// The deadline passed and stop tokens were sent to the remaining workers.
    Forced,
}

/// Result of a submission.
///
/// Submitters are free to ignore it; a dropped request is also logged and
/// published on the event bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use = "ignore explicitly with `let _ =` if drops are acceptable"]
pub enum Admission {
    Accepted(RequestId),
    Dropped {
        request_id: RequestId,
        reason: DropReason,
    },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Admission::Accepted(id) | Admission::Dropped { request_id: id, .. } => *id,
        }
    }

    /// The admission failure as a [`PoolError`], if any.
    pub fn into_result(self) -> Result<RequestId, PoolError> {
        match self {
            Admission::Accepted(id) => Ok(id),
            Admission::Dropped { reason, .. } => Err(PoolError::AdmissionDropped { reason }),
        }
    }
}

#[derive(Debug)]
struct WorkerSet {
    live: usize,
    next_id: usize,
}

pub(crate) struct DispatcherInner<P: Payload> {
    config: PoolConfig,
    registry: Arc<HandlerRegistry<P>>,
    queue: BoundedQueue<P>,
    stop_signal: StopSignal,
    completions: CompletionTracker,
    workers: Mutex<WorkerSet>,
    state: Mutex<PoolState>,
    events: Arc<dyn PoolEventPublisher>,
    scaler: Mutex<Option<ScalerHandle>>,
}

/// Elastic worker pool over a bounded request queue.
///
/// Cheap to clone; clones share one pool. Submission never blocks: a full
/// queue drops the request. Workers are added by [`start`](Self::start),
/// [`spawn_worker`](Self::spawn_worker), [`add_worker`](Self::add_worker)
/// and the scaling controller, and removed one at a time with stop tokens.
pub struct Dispatcher<P: Payload> {
    inner: Arc<DispatcherInner<P>>,
}

impl<P: Payload> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        let live_workers = self.live_workers();
        let state = self.state();
        let scaling = self.is_scaling();
        f.debug_struct("Dispatcher")
            .field("config", &inner.config)
            .field("registry", &inner.registry)
            .field("queue", &inner.queue)
            .field("live_workers", &live_workers)
            .field("pending_workers", &inner.completions.pending())
            .field("state", &state)
            .field("scaling", &scaling)
            .finish()
    }
}

impl<P: Payload> Dispatcher<P> {
    /// Builder for a pool with the given configuration.
    pub fn builder(config: PoolConfig) -> PoolBuilder<P> {
        PoolBuilder::new(config)
    }

    pub(crate) fn new(
        config: PoolConfig,
        registry: Arc<HandlerRegistry<P>>,
        events: Arc<dyn PoolEventPublisher>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue: BoundedQueue::new(config.queue_capacity),
                config,
                registry,
                stop_signal: StopSignal::new(),
                completions: CompletionTracker::new(),
                workers: Mutex::new(WorkerSet { live: 0, next_id: 0 }),
                state: Mutex::new(PoolState::Running),
                events,
                scaler: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> Arc<HandlerRegistry<P>> {
        Arc::clone(&self.inner.registry)
    }

    pub fn events(&self) -> Arc<dyn PoolEventPublisher> {
        Arc::clone(&self.inner.events)
    }

    /// Subscribe to pool events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Launch `min_workers` workers and the scaling controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is not running or is already scaling. No
    /// worker is launched when it fails.
    pub fn start(&self) -> anyhow::Result<()> {
        let policy = self.inner.config.scaling_policy();
        let mut scaler = self.inner.scaler.lock();
        self.check_can_scale(scaler.as_ref(), &policy)?;

        for _ in 0..self.inner.config.min_workers {
            self.spawn_worker();
        }
        *scaler = Some(ScalerHandle::spawn(&self.inner, policy));
        Ok(())
    }

    /// Submit a request without waiting.
    ///
    /// A full or closed queue drops the request and reports why.
    pub fn make_request(&self, request: Request<P>) -> Admission {
        let request_id = request.id();
        let kind = request.kind();

        match self.inner.queue.try_push(request) {
            Ok(()) => {
                telemetry::record_request_enqueued(request_id, kind);
                self.inner
                    .events
                    .publish(PoolEvent::new(PoolEventPayload::Enqueued { request_id, kind }));
                Admission::Accepted(request_id)
            }
            Err(reason) => {
                telemetry::record_request_dropped(request_id, kind, reason);
                self.inner.events.publish(PoolEvent::new(PoolEventPayload::Dropped {
                    request_id,
                    kind,
                    reason,
                }));
                Admission::Dropped { request_id, reason }
            }
        }
    }

    /// Launch a caller-supplied worker against this pool's queue.
    ///
    /// Counts toward the live worker total and toward shutdown draining.
    pub fn add_worker<W: WorkerLauncher<P>>(&self, worker: W) {
        let mut workers = self.inner.workers.lock();
        self.inner.launch_locked(&mut workers, worker);
    }

    /// Launch a standard [`Worker`] with the next free id.
    pub fn spawn_worker(&self) -> WorkerId {
        let mut workers = self.inner.workers.lock();
        self.inner.spawn_locked(&mut workers)
    }

    /// Ask one worker to stop, unless that would go below `min_workers`.
    ///
    /// The count drops immediately; the stop token is consumed by whichever
    /// worker next becomes idle. Returns whether a token was sent.
    pub fn remove_worker(&self, min_workers: usize) -> bool {
        let mut workers = self.inner.workers.lock();
        self.inner.remove_locked(&mut workers, min_workers)
    }

    /// Start the scaling controller with `policy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy is invalid, the pool is not running, or
    /// a controller is already active.
    pub fn scale_workers(&self, policy: ScalingPolicy) -> anyhow::Result<()> {
        let mut scaler = self.inner.scaler.lock();
        self.check_can_scale(scaler.as_ref(), &policy)?;
        *scaler = Some(ScalerHandle::spawn(&self.inner, policy));
        Ok(())
    }

    /// Caller holds the scaler lock.
    fn check_can_scale(
        &self,
        scaler: Option<&ScalerHandle>,
        policy: &ScalingPolicy,
    ) -> anyhow::Result<()> {
        if policy.min_workers > policy.max_workers {
            anyhow::bail!(
                "min_workers ({}) exceeds max_workers ({})",
                policy.min_workers,
                policy.max_workers
            );
        }
        if !(policy.load_limit > 0.0 && policy.load_limit < 1.0) {
            anyhow::bail!("load_limit must be within (0, 1), got {}", policy.load_limit);
        }
        if policy.interval.is_zero() {
            anyhow::bail!("scaling interval must be greater than zero");
        }
        let state = self.state();
        if state != PoolState::Running {
            anyhow::bail!("cannot scale a pool that is {state:?}");
        }
        if scaler.is_some_and(|handle| !handle.is_finished()) {
            anyhow::bail!("scaling controller already running");
        }
        Ok(())
    }

    /// Stop accepting work and wait for workers to drain the queue.
    ///
    /// Waits up to `deadline` for every worker to finish on its own. Past the
    /// deadline, one stop token per live worker is sent and the call waits
    /// for workers to pick them up at their next idle point; a handler that
    /// never returns is abandoned by its attempt timeout, not by this call.
    ///
    /// Calling again after the first call returns [`ShutdownOutcome::Drained`]
    /// once the pool is stopped.
    pub async fn stop(&self, deadline: Duration) -> ShutdownOutcome {
        {
            let mut state = self.inner.state.lock();
            if *state != PoolState::Running {
                drop(state);
                self.inner.completions.wait().await;
                return ShutdownOutcome::Drained;
            }
            *state = PoolState::Draining;
        }

        let inner = Arc::clone(&self.inner);
        async move {
            tracing::info!("initiating graceful shutdown of worker pool");
            inner
                .events
                .publish(PoolEvent::new(PoolEventPayload::ShutdownStarted { deadline }));

            // The controller must not launch workers against a closed queue.
            let scaler = inner.scaler.lock().take();
            if let Some(scaler) = scaler {
                scaler.shutdown().await;
            }

            inner.queue.close();

            let outcome = match tokio::time::timeout(deadline, inner.completions.wait()).await {
                Ok(()) => ShutdownOutcome::Drained,
                Err(_) => {
                    let live = inner.workers.lock().live;
                    let error = PoolError::ShutdownForced {
                        deadline,
                        pending: inner.completions.pending(),
                    };
                    tracing::warn!(%error, live, "sending stop tokens to remaining workers");
                    inner.stop_signal.release(live);
                    inner.completions.wait().await;
                    ShutdownOutcome::Forced
                }
            };

            inner.workers.lock().live = 0;
            *inner.state.lock() = PoolState::Stopped;
            telemetry::set_live_workers(0);
            telemetry::set_queue_depth(inner.queue.depth());

            tracing::info!(outcome = ?outcome, "worker pool shutdown complete");
            inner
                .events
                .publish(PoolEvent::new(PoolEventPayload::ShutdownFinished { outcome }));
            outcome
        }
        .instrument(telemetry::shutdown_span(deadline))
        .await
    }

    pub fn state(&self) -> PoolState {
        *self.inner.state.lock()
    }

    /// Worker count as tracked by the dispatcher.
    pub fn live_workers(&self) -> usize {
        self.inner.workers.lock().live
    }

    /// Launched workers that have not finished yet.
    ///
    /// Can exceed [`live_workers`](Self::live_workers) while removed workers
    /// finish their current request.
    pub fn pending_workers(&self) -> usize {
        self.inner.completions.pending()
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.depth()
    }

    pub fn is_scaling(&self) -> bool {
        self.inner
            .scaler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            sampled_at: Utc::now(),
            queue_depth: self.inner.queue.depth(),
            queue_capacity: self.inner.queue.capacity(),
            live_workers: self.live_workers(),
            pending_workers: self.pending_workers(),
            state: self.state(),
        }
    }
}

impl<P: Payload> DispatcherInner<P> {
    fn launch_locked<W: WorkerLauncher<P>>(&self, workers: &mut WorkerSet, worker: W) {
        let id = worker.id();
        workers.live += 1;
        workers.next_id = workers.next_id.max(id.0 + 1);

        worker.launch(WorkerLanes {
            queue: self.queue.receiver(),
            stop: self.stop_signal.clone(),
            completion: self.completions.register(),
        });

        tracing::debug!(worker = %id, live = workers.live, "worker launched");
        telemetry::set_live_workers(workers.live);
        self.events.publish(PoolEvent::new(PoolEventPayload::WorkerStarted {
            worker_id: id,
            live_workers: workers.live,
        }));
    }

    fn spawn_locked(&self, workers: &mut WorkerSet) -> WorkerId {
        let id = WorkerId(workers.next_id);
        let worker = Worker::new(
            id,
            Arc::clone(&self.registry),
            self.config.worker.clone(),
            Arc::clone(&self.events),
        );
        self.launch_locked(workers, worker);
        id
    }

    fn remove_locked(&self, workers: &mut WorkerSet, min_workers: usize) -> bool {
        if workers.live <= min_workers {
            return false;
        }
        workers.live -= 1;
        self.stop_signal.release(1);
        tracing::debug!(live = workers.live, "stop token sent");
        telemetry::set_live_workers(workers.live);
        true
    }
}

impl<P: Payload> ScaleTarget for DispatcherInner<P> {
    fn scale_step(&self, policy: &ScalingPolicy) -> ScaleDecision {
        let mut workers = self.workers.lock();
        if *self.state.lock() != PoolState::Running {
            return ScaleDecision::NoChange;
        }

        let depth = self.queue.depth();
        telemetry::set_queue_depth(depth);

        let decision = policy.evaluate(depth, workers.live);
        let applied = match decision {
            ScaleDecision::Up => {
                let _span = telemetry::scale_span(decision, depth).entered();
                self.spawn_locked(&mut workers);
                true
            }
            ScaleDecision::Down => {
                let _span = telemetry::scale_span(decision, depth).entered();
                self.remove_locked(&mut workers, policy.min_workers)
            }
            ScaleDecision::NoChange => false,
        };

        if !applied {
            return ScaleDecision::NoChange;
        }
        telemetry::record_scale(decision, workers.live, depth);
        self.events.publish(PoolEvent::new(PoolEventPayload::Scaled {
            decision,
            live_workers: workers.live,
            queue_depth: depth,
        }));
        decision
    }
}
