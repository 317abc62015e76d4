use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Marker for types that can travel through the pool as request payloads.
///
/// Payloads cross task boundaries on every attempt, so they must be shareable
/// between threads. Implemented for every qualifying type.
pub trait Payload: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Payload for T {}

/// Integer type code selecting the handler for a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequestKind(pub u32);

impl Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RequestKind {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of submitted work.
///
/// The payload is opaque to the pool and shared behind an [`Arc`] so every
/// attempt can hand it to a freshly spawned handler task. Apart from the
/// attempt counter, a request never changes after construction, and the
/// counter is only touched by the single worker that dequeued it.
#[derive(Debug)]
pub struct Request<P> {
    id: RequestId,
    kind: RequestKind,
    payload: Arc<P>,
    timeout: Option<Duration>,
    max_retries: u32,
    retries: u32,
}

impl<P> Request<P> {
    pub fn new(kind: u32, payload: P) -> Self {
        Self {
            id: RequestId::new(),
            kind: RequestKind(kind),
            payload: Arc::new(payload),
            timeout: None,
            max_retries: 0,
            retries: 0,
        }
    }

    /// Per-attempt timeout. Zero means "use the worker default".
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Number of retries after the first attempt.
    ///
    /// Capped at `u32::MAX - 1` so the attempt count always fits in a `u32`.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.min(u32::MAX - 1);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retries performed so far by the worker processing this request.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total attempts this request is allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries = (self.retries + 1).min(self.max_retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_no_retries_and_no_timeout() {
        let request = Request::new(1, "hello");
        assert_eq!(request.kind(), RequestKind(1));
        assert_eq!(request.retries(), 0);
        assert_eq!(request.max_retries(), 0);
        assert_eq!(request.max_attempts(), 1);
        assert!(request.timeout().is_none());
        assert_eq!(**request.payload(), "hello");
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let request = Request::new(1, ()).with_timeout(Duration::ZERO);
        assert!(request.timeout().is_none());

        let request = Request::new(1, ()).with_timeout(Duration::from_secs(5));
        assert_eq!(request.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn retry_counter_is_bounded_by_max_retries() {
        let mut request = Request::new(3, ()).with_max_retries(2);
        for _ in 0..5 {
            request.record_retry();
        }
        assert_eq!(request.retries(), 2);
        assert_eq!(request.max_attempts(), 3);
    }

    #[test]
    fn max_retries_is_capped_below_u32_max() {
        let request = Request::new(1, ()).with_max_retries(u32::MAX);
        assert_eq!(request.max_retries(), u32::MAX - 1);
        assert_eq!(request.max_attempts(), u32::MAX);
        assert_eq!(request.max_attempts(), request.max_retries() + 1);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = Request::new(1, ());
        let b = Request::new(1, ());
        assert_ne!(a.id(), b.id());
    }
}
