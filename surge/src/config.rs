use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::runtime::scaler::ScalingPolicy;
use crate::runtime::worker::WorkerConfig;

/// Configuration for the dispatcher, its queue and its scaling controller.
///
/// Deserializable so it can live in the host application's own config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of the bounded request queue. Submissions beyond it are dropped.
    pub queue_capacity: usize,
    /// Workers launched by `start` and the floor for scale-down.
    pub min_workers: usize,
    /// Ceiling enforced by the scaling controller.
    pub max_workers: usize,
    /// Queue depth above which the controller adds a worker.
    pub high_watermark: usize,
    /// Fraction of `high_watermark` below which the controller removes a worker.
    pub load_limit: f64,
    /// Interval between scaling controller ticks, in milliseconds.
    pub scale_interval_ms: u64,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Per-worker processing settings.
    pub worker: WorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            min_workers: 1,
            max_workers: 8,
            high_watermark: 512,
            load_limit: 0.75,
            scale_interval_ms: 100,
            event_capacity: 1024,
            worker: WorkerConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Check the configuration for values the pool cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than zero");
        }
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than zero");
        }
        if self.min_workers > self.max_workers {
            anyhow::bail!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers,
                self.max_workers
            );
        }
        if !(self.load_limit > 0.0 && self.load_limit < 1.0) {
            anyhow::bail!("load_limit must be within (0, 1), got {}", self.load_limit);
        }
        if self.scale_interval_ms == 0 {
            anyhow::bail!("scale_interval_ms must be greater than zero");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    /// Scaling policy derived from the worker bounds and watermarks.
    pub fn scaling_policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            high_watermark: self.high_watermark,
            load_limit: self.load_limit,
            interval: self.scale_interval(),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    pub fn with_watermark(mut self, high_watermark: usize, load_limit: f64) -> Self {
        self.high_watermark = high_watermark;
        self.load_limit = load_limit;
        self
    }

    pub fn with_scale_interval(mut self, ms: u64) -> Self {
        self.scale_interval_ms = ms;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PoolConfig::default().validate().expect("default config");
    }

    #[test]
    fn rejects_inverted_worker_bounds() {
        let err = PoolConfig::default()
            .with_workers(4, 2)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("min_workers"));
    }

    #[test]
    fn rejects_load_limit_outside_unit_interval() {
        for limit in [0.0, 1.0, 1.5, -0.2] {
            let config = PoolConfig::default().with_watermark(10, limit);
            assert!(config.validate().is_err(), "load_limit {limit} accepted");
        }
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = PoolConfig::default().with_queue_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: PoolConfig = serde_json::from_str(
            r#"{ "queue_capacity": 64, "max_workers": 3, "worker": { "default_timeout_ms": 250 } }"#,
        )
        .expect("deserialize");

        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.worker.default_timeout(), Duration::from_millis(250));
        assert!(config.worker.yield_between_requests);
        config.validate().expect("valid");
    }

    #[test]
    fn scaling_policy_mirrors_config() {
        let policy = PoolConfig::default()
            .with_workers(2, 6)
            .with_watermark(100, 0.5)
            .with_scale_interval(20)
            .scaling_policy();

        assert_eq!(policy.min_workers, 2);
        assert_eq!(policy.max_workers, 6);
        assert_eq!(policy.low_watermark(), 50.0);
        assert_eq!(policy.interval, Duration::from_millis(20));
    }
}
