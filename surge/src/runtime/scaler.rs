//! Scaling controller: queue-depth driven worker scaling.
//!
//! On every tick the controller samples queue depth and the live worker count
//! and adds or removes at most one worker. Sampling and acting happen under
//! the dispatcher's worker lock, so concurrent manual scaling cannot push the
//! count past its bounds.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::signal::ShutdownToken;

/// Thresholds and bounds the controller applies each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Scale up while queue depth is strictly above this.
    pub high_watermark: usize,
    /// Scale down while depth is strictly below `load_limit * high_watermark`.
    pub load_limit: f64,
    pub interval: Duration,
}

impl ScalingPolicy {
    pub fn new(min_workers: usize, max_workers: usize, high_watermark: usize, load_limit: f64) -> Self {
        Self {
            min_workers,
            max_workers,
            high_watermark,
            load_limit,
            interval: Duration::from_millis(100),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn low_watermark(&self) -> f64 {
        self.load_limit * self.high_watermark as f64
    }

    /// Decide one step for the given queue depth and worker count.
    pub fn evaluate(&self, queue_depth: usize, workers: usize) -> ScaleDecision {
        if queue_depth > self.high_watermark && workers < self.max_workers {
            ScaleDecision::Up
        } else if (queue_depth as f64) < self.low_watermark() && workers > self.min_workers {
            ScaleDecision::Down
        } else {
            ScaleDecision::NoChange
        }
    }
}

/// A single scaling step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ScaleDecision {
    Up,
    Down,
    NoChange,
}

impl ScaleDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDecision::Up => "scale_up",
            ScaleDecision::Down => "scale_down",
            ScaleDecision::NoChange => "no_change",
        }
    }
}

/// Pool the controller acts on.
pub trait ScaleTarget: Send + Sync + 'static {
    /// Evaluate `policy` against current state and apply the result
    /// atomically with respect to other changes in worker count.
    fn scale_step(&self, policy: &ScalingPolicy) -> ScaleDecision;
}

/// Handle to a running controller task.
#[derive(Debug)]
pub struct ScalerHandle {
    token: ShutdownToken,
    task: JoinHandle<()>,
}

impl ScalerHandle {
    /// Spawn the controller loop.
    ///
    /// The controller holds only a weak reference and exits on its own once
    /// the target is dropped.
    pub fn spawn<T: ScaleTarget>(target: &Arc<T>, policy: ScalingPolicy) -> Self {
        let token = ShutdownToken::new();
        let target: Weak<T> = Arc::downgrade(target);
        let task = tokio::spawn(run(target, policy, token.clone()));
        Self { token, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the controller and wait for its current tick to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!("scaling controller task failed: {err}");
        }
    }
}

async fn run<T: ScaleTarget>(target: Weak<T>, policy: ScalingPolicy, shutdown: ShutdownToken) {
    tracing::info!(
        interval_ms = policy.interval.as_millis() as u64,
        min_workers = policy.min_workers,
        max_workers = policy.max_workers,
        high_watermark = policy.high_watermark,
        low_watermark = policy.low_watermark(),
        "scaling controller started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("scaling controller shutting down");
                break;
            }
            _ = tokio::time::sleep(policy.interval) => {
                let Some(target) = target.upgrade() else {
                    tracing::debug!("pool dropped; scaling controller exiting");
                    break;
                };
                target.scale_step(&policy);
            }
        }
    }
}
