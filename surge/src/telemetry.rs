//! Tracing and telemetry instrumentation for surge.
//!
//! Span constructors for the request lifecycle plus `record_*` helpers that
//! log through `tracing` and, with the `metrics` feature, update the
//! Prometheus collectors in [`crate::metrics`]. Every helper works with the
//! feature disabled.
//!
//! # Example
//!
//! ```ignore
//! use surge::telemetry::{record_request_end, record_request_start};
//!
//! let timing = record_request_start(request.id());
//! // ... run the handler
//! record_request_end(timing, request.kind(), "success");
//! ```

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info_span, Instrument, Span};

use crate::error::DropReason;
use crate::request::{RequestId, RequestKind};
use crate::runtime::{ScaleDecision, WorkerId};

/// Span covering a worker processing one request across all of its attempts.
#[must_use]
pub fn request_process_span(worker_id: WorkerId, request_id: RequestId, kind: RequestKind) -> Span {
    info_span!(
        "surge.process",
        worker_id = %worker_id,
        request_id = %request_id,
        kind = %kind,
    )
}

/// Span attached to the handler task of a single attempt.
#[must_use]
pub fn attempt_span(request_id: RequestId, attempt: u32) -> Span {
    info_span!("surge.attempt", request_id = %request_id, attempt = attempt)
}

/// Span for one scaling action.
#[must_use]
pub fn scale_span(decision: ScaleDecision, queue_depth: usize) -> Span {
    info_span!(
        "surge.scale",
        decision = %decision.as_str(),
        queue_depth = queue_depth,
    )
}

/// Span wrapping a pool shutdown.
#[must_use]
pub fn shutdown_span(deadline: Duration) -> Span {
    info_span!(
        "surge.shutdown",
        deadline_ms = deadline.as_millis() as u64,
    )
}

/// Instrument a future with a [`request_process_span`].
pub fn instrument_process<F>(
    worker_id: WorkerId,
    request_id: RequestId,
    kind: RequestKind,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(request_process_span(worker_id, request_id, kind))
}

/// Record an accepted submission.
pub fn record_request_enqueued(request_id: RequestId, kind: RequestKind) {
    tracing::debug!(request_id = %request_id, kind = %kind, "request enqueued");

    #[cfg(feature = "metrics")]
    crate::metrics::record_request_enqueued(&kind.to_string());
}

/// Record a submission dropped at admission.
pub fn record_request_dropped(request_id: RequestId, kind: RequestKind, reason: DropReason) {
    tracing::warn!(
        request_id = %request_id,
        kind = %kind,
        reason = %reason,
        "request dropped"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_request_dropped(&kind.to_string(), reason.as_str());
}

/// Record the outcome of a single attempt (`success`, `handler_failed`, ...).
pub fn record_attempt(kind: RequestKind, outcome: &str) {
    tracing::trace!(kind = %kind, outcome = outcome, "attempt finished");

    #[cfg(feature = "metrics")]
    crate::metrics::record_attempt(&kind.to_string(), outcome);
}

/// Record a scaling action and the state that triggered it.
pub fn record_scale(decision: ScaleDecision, workers: usize, queue_depth: usize) {
    tracing::info!(
        decision = %decision.as_str(),
        workers = workers,
        queue_depth = queue_depth,
        "worker pool scaled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_scale(decision.as_str());
}

/// Update the queue depth gauge.
pub fn set_queue_depth(depth: usize) {
    tracing::trace!(depth = depth, "queue depth sampled");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(depth as f64);
}

/// Update the live worker gauge.
pub fn set_live_workers(workers: usize) {
    tracing::debug!(workers = workers, "live workers updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_live_workers(workers as f64);
}

/// Observe how long a request took from dequeue to its terminal outcome.
pub fn observe_request_duration(kind: RequestKind, status: &str, duration_secs: f64) {
    tracing::debug!(
        kind = %kind,
        status = status,
        duration_secs = duration_secs,
        "request duration observed"
    );

    #[cfg(feature = "metrics")]
    {
        let kind = kind.to_string();
        crate::metrics::record_request_completed(&kind, status);
        crate::metrics::observe_request_duration(&kind, status, duration_secs);
    }
}

/// Start timing a request. Pass the handle to [`record_request_end`].
pub fn record_request_start(request_id: RequestId) -> RequestTimingHandle {
    RequestTimingHandle {
        request_id,
        start: Instant::now(),
    }
}

/// Finish timing a request with its terminal status
/// (`success`, `handler_not_found` or `retries_exhausted`).
pub fn record_request_end(handle: RequestTimingHandle, kind: RequestKind, status: &str) {
    observe_request_duration(kind, status, handle.elapsed().as_secs_f64());
}

/// Opaque timer returned by [`record_request_start`].
#[derive(Debug)]
pub struct RequestTimingHandle {
    request_id: RequestId,
    start: Instant,
}

impl RequestTimingHandle {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
