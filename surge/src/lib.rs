//! Surge - an elastic in-process worker pool over a bounded request queue.
//!
//! Producers submit typed requests without ever blocking; a pool of workers
//! pulls them off a bounded FIFO and runs the handler registered for each
//! request kind, with a per-attempt timeout and a bounded number of retries.
//! A background controller grows and shrinks the pool from queue depth, and
//! shutdown drains outstanding work up to a deadline.
//!
//! # Core Concepts
//!
//! - **Request**: a [`Request`] pairs an opaque payload with a [`RequestKind`],
//!   an optional per-attempt timeout and a retry budget.
//!
//! - **Handler**: a [`RequestHandler`] performs the work for one kind. Handlers
//!   are looked up in a read-only [`HandlerRegistry`].
//!
//! - **Dispatcher**: the [`Dispatcher`] owns the [`BoundedQueue`], tracks
//!   workers and coordinates shutdown. Submissions beyond capacity are
//!   dropped and reported through [`Admission`].
//!
//! - **Scaling**: a controller evaluates a [`ScalingPolicy`] on every tick and
//!   adds or removes at most one worker.
//!
//! - **Events**: lifecycle transitions are published as [`PoolEvent`]s on a
//!   [`PoolEventPublisher`], by default an in-process [`PoolEventBus`].
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use surge::*;
//!
//! let registry = HandlerRegistry::new().with_handler(
//!     1,
//!     handler_fn(|line: Arc<String>| async move {
//!         tracing::info!(%line, "processing");
//!         HandlerOutcome::Success
//!     }),
//! )?;
//!
//! let pool = PoolBuilder::new(PoolConfig::default())
//!     .with_registry(registry)
//!     .build()?;
//! pool.start()?;
//!
//! let _ = pool.make_request(Request::new(1, "hello".to_string()).with_max_retries(2));
//! pool.stop(Duration::from_secs(5)).await;
//! ```

/// Pool configuration.
///
/// [`PoolConfig`] carries queue capacity, worker bounds, scaling watermarks
/// and the per-worker [`WorkerConfig`]. It deserializes with defaults for
/// missing fields.
pub mod config;

/// Error types observed by the pool.
pub mod error;

/// Event publishing and subscription.
///
/// - [`PoolEvent`] and [`PoolEventPayload`] for event data
/// - [`PoolEventPublisher`] for pluggable sinks
/// - [`PoolEventBus`] for in-process broadcasting
pub mod events;

/// Request handlers and the kind-to-handler registry.
pub mod handler;

#[cfg(feature = "metrics")]
/// Prometheus collectors, registered through `init_metrics`.
pub mod metrics;

/// Bounded admission queue and pool snapshots.
pub mod queue;

/// Request envelope, identifiers and the payload bound.
pub mod request;

/// Runtime: dispatcher, workers, scaling controller and shutdown.
///
/// - [`Dispatcher`] - the pool handle
/// - [`PoolBuilder`] - validated construction
/// - [`Worker`] and [`WorkerLauncher`] - what the dispatcher launches
/// - [`ScalingPolicy`] - controller thresholds
/// - [`CompletionTracker`] and [`StopSignal`] - shutdown coordination
pub mod runtime;

/// Tracing spans and metric helpers.
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use events::*;
pub use handler::*;
pub use queue::*;
pub use request::*;
pub use runtime::*;
