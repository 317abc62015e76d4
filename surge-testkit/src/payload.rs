use serde::{Deserialize, Serialize};
use std::time::Duration;
use surge::Request;

/// Kind code served by [`TestHandler`](crate::TestHandler).
pub const TEST_KIND: u32 = 1;

/// Kind code no test registry ever handles.
pub const UNHANDLED_KIND: u32 = 99;

/// Scripted behaviours for exercising a pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TestPayload {
    /// Succeeds immediately.
    Simple { name: String },
    /// Sleeps, then succeeds.
    Slow { duration_ms: u64, name: String },
    /// Fails on every attempt.
    Failing { error: String, name: String },
    /// Fails the first `failures` attempts, then succeeds.
    Flaky { failures: u32, name: String },
    /// Never returns.
    Hanging { name: String },
    /// Blocks until the handler's gate opens, then succeeds.
    Gated { name: String },
}

impl TestPayload {
    pub fn simple(name: impl Into<String>) -> Self {
        TestPayload::Simple { name: name.into() }
    }

    pub fn slow(name: impl Into<String>, duration: Duration) -> Self {
        TestPayload::Slow {
            duration_ms: duration.as_millis() as u64,
            name: name.into(),
        }
    }

    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        TestPayload::Failing {
            error: error.into(),
            name: name.into(),
        }
    }

    pub fn flaky(name: impl Into<String>, failures: u32) -> Self {
        TestPayload::Flaky {
            failures,
            name: name.into(),
        }
    }

    pub fn hanging(name: impl Into<String>) -> Self {
        TestPayload::Hanging { name: name.into() }
    }

    pub fn gated(name: impl Into<String>) -> Self {
        TestPayload::Gated { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            TestPayload::Simple { name }
            | TestPayload::Slow { name, .. }
            | TestPayload::Failing { name, .. }
            | TestPayload::Flaky { name, .. }
            | TestPayload::Hanging { name }
            | TestPayload::Gated { name } => name,
        }
    }

    /// Wrap in a request for [`TEST_KIND`].
    pub fn into_request(self) -> Request<TestPayload> {
        Request::new(TEST_KIND, self)
    }
}
