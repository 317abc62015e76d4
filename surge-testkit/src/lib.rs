//! Test payloads, handlers and helpers for exercising surge pools.

mod events;
mod handler;
mod mock;
mod payload;

pub use events::EventCollector;
pub use handler::{Gate, TestHandler};
pub use mock::MockHandler;
pub use payload::{TestPayload, TEST_KIND, UNHANDLED_KIND};

use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
