use surge::{PoolEvent, PoolEventPayload};
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Buffers events from a pool subscription for later assertions.
#[derive(Debug)]
pub struct EventCollector {
    rx: broadcast::Receiver<PoolEvent>,
    seen: Vec<PoolEvent>,
    lagged: u64,
}

impl EventCollector {
    pub fn new(rx: broadcast::Receiver<PoolEvent>) -> Self {
        Self {
            rx,
            seen: Vec::new(),
            lagged: 0,
        }
    }

    /// Pull everything currently buffered without waiting.
    pub fn drain(&mut self) -> &[PoolEvent] {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.seen.push(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        &self.seen
    }

    /// Events dropped because the collector fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    pub fn count(&mut self, predicate: impl Fn(&PoolEventPayload) -> bool) -> usize {
        self.drain()
            .iter()
            .filter(|event| predicate(&event.payload))
            .count()
    }
}
