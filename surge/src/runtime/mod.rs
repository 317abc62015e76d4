/// Builder for constructing pools.
pub mod builder;
/// Worker completion tracking for shutdown draining.
pub mod completion;
/// The dispatcher: admission, worker bookkeeping and shutdown.
pub mod dispatcher;
/// Queue-depth driven scaling controller.
pub mod scaler;
/// Cancellation and stop-token primitives.
pub mod signal;
/// Worker configuration and the processing loop.
pub mod worker;

pub use builder::PoolBuilder;
pub use completion::{CompletionGuard, CompletionTracker};
pub use dispatcher::{Admission, Dispatcher, PoolState, ShutdownOutcome};
pub use scaler::{ScaleDecision, ScaleTarget, ScalerHandle, ScalingPolicy};
pub use signal::{ShutdownToken, StopSignal};
pub use worker::{Processed, Worker, WorkerConfig, WorkerExit, WorkerId, WorkerLanes, WorkerLauncher};
