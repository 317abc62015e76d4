use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use surge::{HandlerOutcome, Payload, RequestHandler};

/// Handler returning scripted outcomes and recording every payload it sees.
pub struct MockHandler<P> {
    calls: Arc<Mutex<Vec<Arc<P>>>>,
    script: Arc<Mutex<VecDeque<HandlerOutcome>>>,
    result: Arc<Mutex<HandlerOutcome>>,
}

impl<P> Clone for MockHandler<P> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            script: Arc::clone(&self.script),
            result: Arc::clone(&self.result),
        }
    }
}

impl<P> MockHandler<P> {
    pub fn new() -> Self {
        Self::with_result(HandlerOutcome::Success)
    }

    /// Always return `result`.
    pub fn with_result(result: HandlerOutcome) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            result: Arc::new(Mutex::new(result)),
        }
    }

    /// Return `outcomes` in order, then fall back to the default result.
    pub fn with_script(outcomes: impl IntoIterator<Item = HandlerOutcome>) -> Self {
        let mock = Self::new();
        mock.script.lock().extend(outcomes);
        mock
    }

    pub fn calls(&self) -> Vec<Arc<P>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.call_count();
        assert_eq!(actual, expected, "Expected {expected} calls, got {actual}");
    }

    pub fn set_result(&self, result: HandlerOutcome) {
        *self.result.lock() = result;
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.script.lock().clear();
    }
}

impl<P> Default for MockHandler<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> RequestHandler<P> for MockHandler<P> {
    async fn handle(&self, payload: Arc<P>) -> HandlerOutcome {
        self.calls.lock().push(payload);
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.result.lock().clone())
    }
}
