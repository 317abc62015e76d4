use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::RequestKind;

/// Why a request was refused at admission.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// The bounded queue was at capacity.
    QueueFull,
    /// The pool has begun shutting down and accepts no new work.
    Closed,
}

impl DropReason {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Closed => "closed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures the pool can observe while admitting, processing or stopping.
///
/// None of these propagate back to the submitter. Workers handle them
/// locally (retry or discard) and surface them as diagnostics and
/// [`PoolEvent`](crate::events::PoolEvent)s.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PoolError {
    /// The request was not enqueued.
    #[error("request dropped at admission: {reason}")]
    AdmissionDropped { reason: DropReason },

    /// No handler is registered for the request kind. Never retried.
    #[error("no handler registered for kind {kind}")]
    HandlerNotFound { kind: RequestKind },

    /// The handler reported a failure (or panicked) on one attempt.
    #[error("handler failed on attempt {attempt}: {message}")]
    HandlerFailed { attempt: u32, message: String },

    /// The handler did not finish within the per-attempt timeout.
    ///
    /// The handler task is abandoned, not cancelled.
    #[error("attempt {attempt} timed out after {timeout:?}")]
    AttemptTimedOut { attempt: u32, timeout: Duration },

    /// Every attempt failed; the request is discarded.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The drain deadline elapsed and remaining workers were told to stop.
    #[error("drain deadline of {deadline:?} exceeded with {pending} workers still running")]
    ShutdownForced { deadline: Duration, pending: usize },
}

impl PoolError {
    /// Whether the worker moves on to another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::HandlerFailed { .. } | PoolError::AttemptTimedOut { .. }
        )
    }

    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PoolError::AdmissionDropped { .. } => "admission_dropped",
            PoolError::HandlerNotFound { .. } => "handler_not_found",
            PoolError::HandlerFailed { .. } => "handler_failed",
            PoolError::AttemptTimedOut { .. } => "attempt_timed_out",
            PoolError::RetriesExhausted { .. } => "retries_exhausted",
            PoolError::ShutdownForced { .. } => "shutdown_forced",
        }
    }
}
