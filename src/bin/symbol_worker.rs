use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};

use txpublish::bus::{EventPublisher, EventSubscriber, InMemoryQueue};
use txpublish::router::Router;
use txpublish::symbol::{
    InMemorySymbolStore, Symbol, SymbolCatalog, SymbolEvents, SymbolQuery, SymbolUseCase,
    SymbolValidator,
};
use txpublish::telemetry::init_tracing;
use txpublish::{Config, Context, MetricsPublisher, MetricsSubscriber, Worker};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;
    init_tracing(&config.log_level, config.json_logs).context("failed to set up logging")?;

    info!(
        max_retries = config.max_retries,
        poll_interval_ms = config.poll_interval_ms,
        event_codec = %config.event_codec,
        "Starting symbol worker"
    );

    let queue = InMemoryQueue::new();
    let store = InMemorySymbolStore::new();
    let catalog = SymbolCatalog::new();

    let mut router = Router::new(
        MetricsSubscriber::new(EventSubscriber::new(queue.clone())),
        config.router_config(),
    )
    .with_publisher(EventPublisher::new(queue.clone()));
    catalog.register(&mut router)?;

    let router = Arc::new(router);
    let worker = Worker::from_arc(router.clone(), Context::new())
        .with_stop_timeout(config.stop_timeout());
    worker.start()?;

    let usecase = SymbolUseCase::new(
        store.clone(),
        store.clone(),
        SymbolEvents::new(MetricsPublisher::new(EventPublisher::new(queue.clone())))
            .with_codec(config.event_codec),
        SymbolValidator,
    );

    let ctx = Context::new().with_request_id("demo-1");
    let btc = usecase.create(&ctx, Symbol::new("Bitcoin", "BTC-USD"))?;
    let eth = usecase.create(&ctx, Symbol::new("Ether", "ETH-USD"))?;
    usecase.update(&ctx, btc.clone().with_description("spot bitcoin"))?;
    usecase.delete(&ctx, eth.id)?;

    if let Err(err) = usecase.create(&ctx, Symbol::new("Bitcoin again", "BTC-USD")) {
        warn!(status = err.status_code(), error = %err, "duplicate rejected as expected");
    }

    let stored = usecase.list(&ctx, &SymbolQuery::new())?;
    wait_for(Duration::from_secs(2), || {
        catalog.len() == stored.len() && router.stats().handled >= 4
    });

    info!(
        stored = stored.len(),
        catalog = catalog.len(),
        stats = ?router.stats(),
        "Round finished, stopping worker"
    );

    worker.stop().context("worker did not stop cleanly")?;
    Ok(())
}

fn wait_for(limit: Duration, done: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !done() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
}
