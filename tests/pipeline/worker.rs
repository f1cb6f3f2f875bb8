//! Worker side: retry, recovery and shutdown with a real router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use txpublish::bus::{Broker, InMemoryQueue, Message};
use txpublish::router::{HandlerFn, Middleware, RouterConfig, RouterState};
use txpublish::{Context, Worker, WorkerError};

use crate::support::{quick_router_config, router, shared, wait_until};

// ============================================================================
// Panics are recovered, retried and nacked
// ============================================================================

#[test]
fn panicking_handler_is_retried_then_nacked_and_the_worker_moves_on() {
    let queue = InMemoryQueue::new();
    let attempts: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    // Default retry policy: 3 retries from 100ms.
    let config = RouterConfig {
        poll_interval: Duration::from_millis(5),
        ..RouterConfig::default()
    };
    let mut router = router(&queue, config);
    let seen = attempts.clone();
    router
        .add_consumer("jobs", move |message| {
            *seen
                .lock()
                .unwrap()
                .entry(message.uuid.clone())
                .or_default() += 1;
            if message.uuid == "job-2" {
                panic!("job-2 is cursed");
            }
            Ok(())
        })
        .unwrap();
    let router = shared(router);
    let worker = Worker::from_arc(router.clone(), Context::new());
    worker.start().unwrap();

    let started = Instant::now();
    for id in ["job-1", "job-2", "job-3"] {
        queue.publish("jobs", Message::with_uuid(id, Vec::new())).unwrap();
    }

    wait_until("job-3 acked", || {
        queue.acknowledged().contains(&"job-3".to_string())
    });
    let elapsed = started.elapsed();
    worker.stop().unwrap();

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts["job-1"], 1);
    assert_eq!(attempts["job-2"], 4);
    assert_eq!(attempts["job-3"], 1);

    let nacked = queue.nacked();
    assert_eq!(nacked.len(), 1);
    assert_eq!(nacked[0].0, "job-2");
    assert!(nacked[0].1.contains("job-2 is cursed"));
    assert_eq!(
        queue.acknowledged(),
        vec!["job-1".to_string(), "job-3".to_string()]
    );

    // 100ms + 200ms + 400ms of backoff before job-3 could run.
    assert!(elapsed >= Duration::from_millis(700), "took {elapsed:?}");

    let stats = router.stats();
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.panics, 4);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn concurrent_stops_return_the_same_outcome() {
    let queue = InMemoryQueue::new();
    let mut router = router(&queue, quick_router_config());
    router.add_consumer("jobs", |_| Ok(())).unwrap();
    let router = shared(router);
    let worker = Arc::new(Worker::from_arc(router.clone(), Context::new()));
    worker.start().unwrap();
    wait_until("router running", || router.is_running());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let worker = worker.clone();
            thread::spawn(move || worker.stop())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    assert_eq!(router.state(), RouterState::Stopped);
    assert!(queue.is_closed());
    assert_eq!(queue.subscriber_count("jobs"), 0);
}

#[test]
fn stop_timeout_still_waits_for_the_in_flight_message() {
    const HANDLER_TIME: Duration = Duration::from_millis(300);
    const STOP_TIMEOUT: Duration = Duration::from_millis(20);
    const SLACK: Duration = Duration::from_millis(200);

    let queue = InMemoryQueue::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let in_handler = Arc::new(AtomicUsize::new(0));
    let mut router = router(&queue, quick_router_config());
    let (counter, entered) = (handled.clone(), in_handler.clone());
    router
        .add_consumer("jobs", move |_| {
            entered.fetch_add(1, Ordering::SeqCst);
            thread::sleep(HANDLER_TIME);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let router = shared(router);
    let worker = Worker::from_arc(router.clone(), Context::new());
    worker.start().unwrap();

    queue.publish("jobs", Message::with_uuid("slow", Vec::new())).unwrap();
    wait_until("handler started", || in_handler.load(Ordering::SeqCst) == 1);

    let started = Instant::now();
    let outcome = worker.stop_within(STOP_TIMEOUT);
    let elapsed = started.elapsed();

    assert!(matches!(outcome, Err(WorkerError::StopTimeout(_))));
    // Bounded by the timeout plus what was left of the in-flight message.
    assert!(elapsed >= STOP_TIMEOUT, "took {elapsed:?}");
    assert!(elapsed < STOP_TIMEOUT + HANDLER_TIME + SLACK, "took {elapsed:?}");
    // The run loop was joined: the in-flight message finished and was acked.
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(queue.acknowledged(), vec!["slow".to_string()]);
    assert_eq!(router.state(), RouterState::Stopped);
    assert!(matches!(worker.stop(), Err(WorkerError::StopTimeout(_))));
}

#[test]
fn broker_loss_surfaces_as_a_run_error() {
    let queue = InMemoryQueue::new();
    let mut router = router(&queue, quick_router_config());
    router.add_consumer("jobs", |_| Ok(())).unwrap();
    let router = shared(router);
    let worker = Worker::from_arc(router.clone(), Context::new());
    worker.start().unwrap();
    wait_until("router running", || router.is_running());

    queue.close().unwrap();
    wait_until("router stopped", || router.state() == RouterState::Stopped);

    assert!(matches!(worker.stop(), Err(WorkerError::Run(_))));
}

/// Fails every message whose uuid starts with "bad" by panicking.
struct Tripwire;

impl Middleware for Tripwire {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |message: &Message| {
            if message.uuid.starts_with("bad") {
                panic!("tripwire on {}", message.uuid);
            }
            next(message)
        })
    }
}

#[test]
fn panic_in_outer_middleware_does_not_wedge_shutdown() {
    let queue = InMemoryQueue::new();
    let mut router = router(&queue, quick_router_config()).with_middleware(Tripwire);
    router.add_consumer("jobs", |_| Ok(())).unwrap();
    let router = shared(router);
    let worker = Worker::from_arc(router.clone(), Context::new())
        .with_stop_timeout(Duration::from_secs(1));
    worker.start().unwrap();

    for id in ["bad-1", "ok-1", "bad-2", "ok-2"] {
        queue.publish("jobs", Message::with_uuid(id, Vec::new())).unwrap();
    }
    wait_until("ok messages acked", || queue.acknowledged().len() == 2);

    assert!(router.is_running());
    worker.stop().unwrap();

    let nacked: Vec<String> = queue.nacked().into_iter().map(|(id, _)| id).collect();
    assert_eq!(nacked, vec!["bad-1".to_string(), "bad-2".to_string()]);
    assert_eq!(router.state(), RouterState::Stopped);
}
