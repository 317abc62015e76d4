//! Pool integration tests.
//!
//! Admission bounds, retry accounting, handler lookup, graceful and forced
//! shutdown, and queue-depth driven scaling against real worker tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use surge::*;
use surge_testkit::{
    init_tracing, wait_until, EventCollector, MockHandler, TestHandler, TestPayload, TEST_KIND,
    UNHANDLED_KIND,
};
use tokio::time::timeout;

fn config() -> PoolConfig {
    PoolConfig::default()
        .with_workers(1, 1)
        .with_worker(WorkerConfig::default().with_default_timeout(1_000))
}

fn build(config: PoolConfig, handler: &TestHandler) -> Dispatcher<TestPayload> {
    init_tracing();
    PoolBuilder::new(config)
        .with_registry(handler.registry())
        .build()
        .expect("pool builds")
}

#[tokio::test]
async fn admission_is_bounded_by_queue_capacity() {
    let handler = TestHandler::new();
    let pool = build(config().with_queue_capacity(4), &handler);
    let mut events = EventCollector::new(pool.subscribe());

    let accepted = (0..10)
        .map(|i| pool.make_request(TestPayload::simple(format!("r{i}")).into_request()))
        .filter(Admission::is_accepted)
        .count();

    assert_eq!(accepted, 4);
    assert_eq!(pool.queue_depth(), 4);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::Dropped {
                reason: DropReason::QueueFull,
                ..
            }
        )),
        6
    );
    assert_eq!(handler.total_attempts(), 0);
}

#[tokio::test]
async fn failing_request_gets_exactly_max_retries_plus_one_attempts() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(
        TestPayload::failing("doomed", "always broken")
            .into_request()
            .with_max_retries(3),
    );

    assert_eq!(
        pool.stop(Duration::from_secs(5)).await,
        ShutdownOutcome::Drained
    );
    assert_eq!(handler.attempts_for("doomed"), 4);
    assert!(handler.completed().is_empty());

    let attempts: Vec<u32> = events
        .drain()
        .iter()
        .filter_map(|e| match &e.payload {
            PoolEventPayload::AttemptFailed { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::Discarded {
                error: PoolError::RetriesExhausted { attempts: 4 },
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn success_short_circuits_remaining_retries() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    pool.start().expect("start");

    let _ = pool.make_request(TestPayload::simple("once").into_request().with_max_retries(5));
    let _ = pool.make_request(TestPayload::flaky("third-time", 2).into_request().with_max_retries(5));

    pool.stop(Duration::from_secs(5)).await;
    assert_eq!(handler.attempts_for("once"), 1);
    assert_eq!(handler.attempts_for("third-time"), 3);
    assert_eq!(handler.completed(), vec!["once", "third-time"]);
}

#[tokio::test]
async fn unknown_kind_is_discarded_without_attempts() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(
        Request::new(UNHANDLED_KIND, TestPayload::simple("orphan")).with_max_retries(3),
    );
    let _ = pool.make_request(TestPayload::simple("after").into_request());

    pool.stop(Duration::from_secs(5)).await;
    assert_eq!(handler.attempts_for("orphan"), 0);
    assert_eq!(handler.completed(), vec!["after"]);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::Discarded {
                error: PoolError::HandlerNotFound { .. },
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn graceful_stop_processes_everything_accepted() {
    let handler = TestHandler::new();
    let pool = build(config().with_workers(3, 3), &handler);
    pool.start().expect("start");

    let mut accepted = 0;
    for i in 0..60 {
        let payload = TestPayload::slow(format!("job-{i}"), Duration::from_millis(2));
        if pool.make_request(payload.into_request()).is_accepted() {
            accepted += 1;
        }
    }

    let outcome = timeout(Duration::from_secs(10), pool.stop(Duration::from_secs(10)))
        .await
        .expect("stop returns");
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(handler.completed_count(), accepted);
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(pool.pending_workers(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_forces_stop_tokens_and_abandons_hung_handler() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    pool.start().expect("start");

    let _ = pool.make_request(
        TestPayload::hanging("stuck")
            .into_request()
            .with_timeout(Duration::from_secs(30)),
    );
    assert!(wait_until(Duration::from_secs(1), || handler.in_flight() == 1).await);

    let started = tokio::time::Instant::now();
    let outcome = pool.stop(Duration::from_millis(100)).await;

    assert_eq!(outcome, ShutdownOutcome::Forced);
    // The worker only exits once the attempt timeout abandons the handler.
    assert!(started.elapsed() >= Duration::from_secs(29));
    assert_eq!(pool.pending_workers(), 0);
    assert_eq!(handler.in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_stop_ends_busy_worker_with_stop_token_and_leaves_backlog() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(
        TestPayload::gated("blocker")
            .into_request()
            .with_timeout(Duration::from_millis(200)),
    );
    for i in 0..5 {
        let _ = pool.make_request(TestPayload::simple(format!("backlog-{i}")).into_request());
    }
    assert!(wait_until(Duration::from_secs(1), || handler.in_flight() == 1).await);
    assert_eq!(pool.queue_depth(), 5);

    let outcome = pool.stop(Duration::from_millis(50)).await;

    assert_eq!(outcome, ShutdownOutcome::Forced);
    assert_eq!(pool.pending_workers(), 0);
    assert_eq!(pool.queue_depth(), 5);
    assert_eq!(handler.completed_count(), 0);
    assert_eq!(handler.total_attempts(), 1);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::WorkerStopped {
                exit: WorkerExit::StopSignal,
                ..
            }
        )),
        1
    );
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::WorkerStopped {
                exit: WorkerExit::QueueClosed,
                ..
            }
        )),
        0
    );
}

#[tokio::test]
async fn timed_out_attempts_keep_running_in_background() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(
        TestPayload::slow("late", Duration::from_millis(150))
            .into_request()
            .with_timeout(Duration::from_millis(20))
            .with_max_retries(1),
    );

    pool.stop(Duration::from_secs(5)).await;
    assert_eq!(handler.attempts_for("late"), 2);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PoolEventPayload::AttemptFailed {
                error: PoolError::AttemptTimedOut { .. },
                ..
            }
        )),
        2
    );

    // Both abandoned attempts finish on their own; their results are ignored.
    assert!(wait_until(Duration::from_secs(2), || handler.completed_count() == 2).await);
}

#[tokio::test]
async fn controller_scales_up_under_backlog_and_back_down_when_idle() {
    let handler = TestHandler::new();
    let config = PoolConfig::default()
        .with_queue_capacity(64)
        .with_workers(1, 4)
        .with_watermark(2, 0.5)
        .with_scale_interval(10)
        .with_worker(WorkerConfig::default().with_default_timeout(5_000));
    let pool = build(config, &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");
    assert_eq!(pool.live_workers(), 1);

    for i in 0..20 {
        let _ = pool.make_request(TestPayload::gated(format!("g{i}")).into_request());
    }

    assert!(
        wait_until(Duration::from_secs(3), || pool.live_workers() == 4).await,
        "pool should grow to max_workers, got {}",
        pool.live_workers()
    );

    handler.gate().open();
    assert!(
        wait_until(Duration::from_secs(3), || pool.live_workers() == 1
            && pool.queue_depth() == 0)
        .await,
        "pool should shrink to min_workers, got {}",
        pool.live_workers()
    );

    assert_eq!(pool.stop(Duration::from_secs(5)).await, ShutdownOutcome::Drained);
    assert_eq!(handler.completed_count(), 20);

    let scaled: Vec<(ScaleDecision, usize)> = events
        .drain()
        .iter()
        .filter_map(|e| match &e.payload {
            PoolEventPayload::Scaled {
                decision,
                live_workers,
                ..
            } => Some((*decision, *live_workers)),
            _ => None,
        })
        .collect();
    assert!(scaled.iter().all(|(_, live)| (1..=4).contains(live)));
    assert_eq!(
        scaled.iter().filter(|(d, _)| *d == ScaleDecision::Up).count(),
        3
    );
    assert_eq!(
        scaled.iter().filter(|(d, _)| *d == ScaleDecision::Down).count(),
        3
    );
}

struct RecordingLauncher {
    id: WorkerId,
    seen: Arc<Mutex<Vec<String>>>,
}

impl WorkerLauncher<TestPayload> for RecordingLauncher {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn launch(self, lanes: WorkerLanes<TestPayload>) {
        tokio::spawn(async move {
            let _completion = lanes.completion;
            loop {
                tokio::select! {
                    biased;
                    () = lanes.stop.recv() => break,
                    request = lanes.queue.recv() => match request {
                        Some(request) => self.seen.lock().push(request.payload().name().to_string()),
                        None => break,
                    },
                }
            }
        });
    }
}

#[tokio::test]
async fn custom_workers_count_toward_drain() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let seen = Arc::new(Mutex::new(Vec::new()));

    pool.add_worker(RecordingLauncher {
        id: WorkerId(100),
        seen: Arc::clone(&seen),
    });
    assert_eq!(pool.live_workers(), 1);
    assert_eq!(pool.spawn_worker(), WorkerId(101));

    for name in ["a", "b", "c"] {
        let _ = pool.make_request(TestPayload::simple(name).into_request());
    }

    assert_eq!(pool.stop(Duration::from_secs(5)).await, ShutdownOutcome::Drained);
    let custom = seen.lock().len();
    assert_eq!(custom + handler.completed_count(), 3);
}

#[tokio::test]
async fn scripted_mock_handler_sees_every_attempt() {
    init_tracing();
    let mock = MockHandler::<String>::with_script([
        HandlerOutcome::failure("first"),
        HandlerOutcome::failure("second"),
    ]);
    let registry = HandlerRegistry::new()
        .with_handler(TEST_KIND, mock.clone())
        .expect("register");
    let pool = PoolBuilder::new(config())
        .with_registry(registry)
        .build()
        .expect("pool builds");
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(Request::new(TEST_KIND, "payload".to_string()).with_max_retries(2));
    pool.stop(Duration::from_secs(5)).await;

    mock.assert_call_count_eq(3);
    assert!(mock.calls().iter().all(|p| p.as_str() == "payload"));
    assert_eq!(
        events.count(|e| matches!(e, PoolEventPayload::Completed { attempts: 3, .. })),
        1
    );
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let handler = TestHandler::new();
    let pool = build(config(), &handler);
    let mut events = EventCollector::new(pool.subscribe());
    pool.start().expect("start");

    let _ = pool.make_request(TestPayload::simple("one").into_request());
    assert!(wait_until(Duration::from_secs(2), || handler.completed_count() == 1).await);
    pool.stop(Duration::from_secs(5)).await;

    let kinds: Vec<&'static str> = events
        .drain()
        .iter()
        .map(|e| match e.payload {
            PoolEventPayload::WorkerStarted { .. } => "worker_started",
            PoolEventPayload::Enqueued { .. } => "enqueued",
            PoolEventPayload::Completed { .. } => "completed",
            PoolEventPayload::ShutdownStarted { .. } => "shutdown_started",
            PoolEventPayload::WorkerStopped { .. } => "worker_stopped",
            PoolEventPayload::ShutdownFinished { .. } => "shutdown_finished",
            _ => "other",
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            "worker_started",
            "enqueued",
            "completed",
            "shutdown_started",
            "worker_stopped",
            "shutdown_finished"
        ]
    );
}

#[tokio::test]
async fn concurrent_stop_calls_both_return() {
    let handler = TestHandler::new();
    let pool = build(config().with_workers(2, 2), &handler);
    pool.start().expect("start");
    for i in 0..10 {
        let _ = pool.make_request(
            TestPayload::slow(format!("s{i}"), Duration::from_millis(5)).into_request(),
        );
    }

    let (a, b) = tokio::join!(
        pool.stop(Duration::from_secs(5)),
        pool.stop(Duration::from_secs(5))
    );
    assert_eq!(a, ShutdownOutcome::Drained);
    assert_eq!(b, ShutdownOutcome::Drained);
    assert_eq!(handler.completed_count(), 10);
    assert_eq!(pool.state(), PoolState::Stopped);
}
