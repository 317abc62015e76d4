//! Prometheus metrics instrumentation for surge.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `surge_requests_enqueued_total` - Submissions accepted into the queue
//! - `surge_requests_dropped_total` - Submissions refused at admission
//! - `surge_requests_completed_total` - Requests reaching a terminal outcome
//! - `surge_attempts_total` - Handler attempts by outcome
//! - `surge_scale_actions_total` - Workers added or removed by the scaler
//!
//! ## Gauges
//! - `surge_queue_depth` - Requests waiting in the queue
//! - `surge_live_workers` - Worker count tracked by the dispatcher
//!
//! ## Histograms
//! - `surge_request_duration_seconds` - Dequeue to terminal outcome
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, Gauge, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for surge metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `kind`.
pub static REQUESTS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "surge_requests_enqueued_total",
        "Total number of requests accepted into the queue",
    );
    CounterVec::new(opts, &["kind"]).expect("surge_requests_enqueued_total metric creation failed")
});

/// Labels: `kind`, `reason` (queue_full, closed).
pub static REQUESTS_DROPPED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "surge_requests_dropped_total",
        "Total number of requests dropped at admission",
    );
    CounterVec::new(opts, &["kind", "reason"])
        .expect("surge_requests_dropped_total metric creation failed")
});

/// Labels: `kind`, `status` (success, handler_not_found, retries_exhausted).
pub static REQUESTS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "surge_requests_completed_total",
        "Total number of requests reaching a terminal outcome",
    );
    CounterVec::new(opts, &["kind", "status"])
        .expect("surge_requests_completed_total metric creation failed")
});

/// Labels: `kind`, `outcome`.
pub static ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("surge_attempts_total", "Total number of handler attempts");
    CounterVec::new(opts, &["kind", "outcome"]).expect("surge_attempts_total metric creation failed")
});

/// Labels: `decision` (scale_up, scale_down).
pub static SCALE_ACTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "surge_scale_actions_total",
        "Total number of scaling actions taken",
    );
    CounterVec::new(opts, &["decision"]).expect("surge_scale_actions_total metric creation failed")
});

pub static QUEUE_DEPTH: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("surge_queue_depth", "Requests waiting in the queue")
        .expect("surge_queue_depth metric creation failed")
});

pub static LIVE_WORKERS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("surge_live_workers", "Worker count tracked by the dispatcher")
        .expect("surge_live_workers metric creation failed")
});

/// Labels: `kind`, `status`.
pub static REQUEST_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.0005, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "surge_request_duration_seconds",
        "Time from dequeue to terminal outcome in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["kind", "status"])
        .expect("surge_request_duration_seconds metric creation failed")
});

/// Register every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(REQUESTS_ENQUEUED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(REQUESTS_DROPPED_TOTAL.clone()),
        Box::new(REQUESTS_COMPLETED_TOTAL.clone()),
        Box::new(ATTEMPTS_TOTAL.clone()),
        Box::new(SCALE_ACTIONS_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(LIVE_WORKERS.clone()),
        Box::new(REQUEST_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_request_enqueued(kind: &str) {
    REQUESTS_ENQUEUED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_request_dropped(kind: &str, reason: &str) {
    REQUESTS_DROPPED_TOTAL.with_label_values(&[kind, reason]).inc();
}

pub fn record_request_completed(kind: &str, status: &str) {
    REQUESTS_COMPLETED_TOTAL
        .with_label_values(&[kind, status])
        .inc();
}

pub fn record_attempt(kind: &str, outcome: &str) {
    ATTEMPTS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_scale(decision: &str) {
    SCALE_ACTIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn set_queue_depth(depth: f64) {
    QUEUE_DEPTH.set(depth);
}

pub fn set_live_workers(workers: f64) {
    LIVE_WORKERS.set(workers);
}

pub fn observe_request_duration(kind: &str, status: &str, duration_secs: f64) {
    REQUEST_DURATION_SECONDS
        .with_label_values(&[kind, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
