use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge::{HandlerOutcome, HandlerRegistry, RequestHandler};
use tokio::sync::watch;

use crate::payload::{TestPayload, TEST_KIND};

/// Latch that holds [`TestPayload::Gated`] handlers until opened.
#[derive(Clone, Debug)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler executing [`TestPayload`] scripts and recording what it saw.
///
/// Clones share state, so keep one clone for assertions and register another.
#[derive(Clone, Default)]
pub struct TestHandler {
    attempts: Arc<Mutex<HashMap<String, u32>>>,
    completed: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    gate: Gate,
}

impl TestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a clone of this handler under [`TEST_KIND`].
    pub fn registry(&self) -> HandlerRegistry<TestPayload> {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TEST_KIND, self.clone())
            .expect("fresh registry accepts the test handler");
        registry
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn attempts_for(&self, name: &str) -> u32 {
        self.attempts.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    /// Names of payloads that succeeded, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    /// Handler invocations currently running, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn succeed(&self, name: &str) -> HandlerOutcome {
        self.completed.lock().push(name.to_string());
        HandlerOutcome::Success
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RequestHandler<TestPayload> for TestHandler {
    async fn handle(&self, payload: Arc<TestPayload>) -> HandlerOutcome {
        let _in_flight = InFlight::enter(&self.in_flight);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(payload.name().to_string()).or_insert(0);
            *count += 1;
            *count
        };

        match payload.as_ref() {
            TestPayload::Simple { name } => self.succeed(name),
            TestPayload::Slow { duration_ms, name } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                self.succeed(name)
            }
            TestPayload::Failing { error, .. } => HandlerOutcome::failure(error.clone()),
            TestPayload::Flaky { failures, name } => {
                if attempt <= *failures {
                    HandlerOutcome::failure(format!("flaky failure {attempt} of {failures}"))
                } else {
                    self.succeed(name)
                }
            }
            TestPayload::Hanging { .. } => std::future::pending().await,
            TestPayload::Gated { name } => {
                self.gate.wait().await;
                self.succeed(name)
            }
        }
    }
}
