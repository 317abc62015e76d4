use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::request::{Payload, RequestKind};

/// Result of running a handler once against a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The work is done; no further attempts are made.
    Success,
    /// The attempt failed and may be retried.
    Failure {
        /// Error message.
        error: Option<String>,
    },
}

impl HandlerOutcome {
    /// Failure carrying the given message.
    pub fn failure(error: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for HandlerOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => HandlerOutcome::Success,
            Err(err) => HandlerOutcome::failure(err.to_string()),
        }
    }
}

/// Performs the work for one request kind.
///
/// Each attempt runs in its own task, so the payload arrives as a shared
/// [`Arc`]. A handler that outlives its attempt timeout keeps running and its
/// outcome is discarded.
#[async_trait]
pub trait RequestHandler<P: Payload>: Send + Sync + 'static {
    /// Run the handler once.
    async fn handle(&self, payload: Arc<P>) -> HandlerOutcome;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// let echo = handler_fn(|payload: Arc<String>| async move {
///     tracing::info!(%payload, "echo");
///     HandlerOutcome::Success
/// });
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("fn_type", &std::any::type_name::<F>())
            .finish()
    }
}

#[async_trait]
impl<P, F, Fut> RequestHandler<P> for FnHandler<F>
where
    P: Payload,
    F: Fn(Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, payload: Arc<P>) -> HandlerOutcome {
        (self.f)(payload).await
    }
}

/// Read-only table from request kind to handler.
///
/// Built before the pool starts and shared by every worker; the pool never
/// mutates it.
pub struct HandlerRegistry<P: Payload> {
    handlers: HashMap<RequestKind, Arc<dyn RequestHandler<P>>>,
}

impl<P: Payload> fmt::Debug for HandlerRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl<P: Payload> Default for HandlerRegistry<P> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<P: Payload> HandlerRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` already has a handler.
    pub fn register(
        &mut self,
        kind: u32,
        handler: impl RequestHandler<P>,
    ) -> anyhow::Result<()> {
        self.register_shared(kind, Arc::new(handler))
    }

    /// Register an already shared handler for `kind`.
    pub fn register_shared(
        &mut self,
        kind: u32,
        handler: Arc<dyn RequestHandler<P>>,
    ) -> anyhow::Result<()> {
        let kind = RequestKind(kind);
        if self.handlers.contains_key(&kind) {
            anyhow::bail!("handler already registered for kind {kind}");
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_handler(
        mut self,
        kind: u32,
        handler: impl RequestHandler<P>,
    ) -> anyhow::Result<Self> {
        self.register(kind, handler)?;
        Ok(self)
    }

    pub fn get(&self, kind: RequestKind) -> Option<Arc<dyn RequestHandler<P>>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: RequestKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
