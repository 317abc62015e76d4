//! Elastic pool example.
//!
//! Starts a pool with three workers, lets the scaling controller grow it
//! toward twenty while 50 000 greetings are submitted, then drains it with a
//! ten second deadline.
//!
//! Run with `RUST_LOG=surge=info cargo run --example elastic_pool`.

use std::sync::Arc;
use std::time::Duration;

use surge::*;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const GREETING: u32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    tracing::info!(cpus, "starting elastic pool example");

    let requests = 50_000;
    let config = PoolConfig::default()
        .with_queue_capacity(50_000)
        .with_workers(3, 20)
        .with_watermark(10_000, 0.75)
        .with_worker(WorkerConfig::default().with_default_timeout(5_000));

    let registry = HandlerRegistry::new().with_handler(
        GREETING,
        handler_fn(|message: Arc<String>| async move {
            tracing::debug!(%message, "handled");
            HandlerOutcome::Success
        }),
    )?;

    let pool = PoolBuilder::new(config).with_registry(registry).build()?;
    let mut events = pool.subscribe();
    let scaled = tokio::spawn(async move {
        let mut peak = 0;
        loop {
            match events.recv().await {
                Ok(event) => match event.payload {
                    PoolEventPayload::Scaled { live_workers, .. } => peak = peak.max(live_workers),
                    PoolEventPayload::ShutdownFinished { .. } => break,
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        peak
    });

    pool.start()?;

    let mut dropped = 0;
    for i in 0..requests {
        let request = Request::new(GREETING, format!("(msg {i}) -> hello"))
            .with_timeout(Duration::from_secs(5));
        if !pool.make_request(request).is_accepted() {
            dropped += 1;
        }
    }
    tracing::info!(requests, dropped, snapshot = ?pool.snapshot(), "all requests submitted");

    let outcome = pool.stop(Duration::from_secs(10)).await;
    let peak = scaled.await.unwrap_or_default();
    tracing::info!(?outcome, peak_workers = peak, "pool stopped");
    Ok(())
}
