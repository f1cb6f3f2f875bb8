//! Shared wiring for the pipeline tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use txpublish::bus::{EventPublisher, EventSubscriber, InMemoryQueue};
use txpublish::router::{Router, RouterConfig};
use txpublish::symbol::{InMemorySymbolStore, SymbolEvents, SymbolUseCase, SymbolValidator};

pub type TestUseCase = SymbolUseCase<
    InMemorySymbolStore,
    InMemorySymbolStore,
    EventPublisher<InMemoryQueue>,
    SymbolValidator,
>;

pub type TestRouter = Router<EventSubscriber<InMemoryQueue>>;

/// Service side over `queue`, with ids starting at `next_id`.
pub fn service(queue: &InMemoryQueue, next_id: i64) -> (TestUseCase, InMemorySymbolStore) {
    let store = InMemorySymbolStore::with_next_id(next_id);
    let usecase = SymbolUseCase::new(
        store.clone(),
        store.clone(),
        SymbolEvents::new(EventPublisher::new(queue.clone())),
        SymbolValidator,
    );
    (usecase, store)
}

/// Router settings with short polls; retries keep the default count.
pub fn quick_router_config() -> RouterConfig {
    RouterConfig {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        ..RouterConfig::default()
    }
}

pub fn router(queue: &InMemoryQueue, config: RouterConfig) -> TestRouter {
    Router::new(EventSubscriber::new(queue.clone()), config)
        .with_publisher(EventPublisher::new(queue.clone()))
}

/// Poll `done` until it holds, failing the test after five seconds.
pub fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn shared(router: TestRouter) -> Arc<TestRouter> {
    Arc::new(router)
}
