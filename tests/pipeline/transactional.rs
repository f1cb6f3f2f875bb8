//! Transactional publish: the write and its event commit together.

use std::sync::Arc;
use std::thread;

use txpublish::bus::{keys, InMemoryQueue};
use txpublish::router::HandlerError;
use txpublish::symbol::{
    decode_event, Symbol, SymbolCatalog, SymbolEvent, SymbolQuery, SYMBOL_CREATED,
    SYMBOL_DELETED,
};
use txpublish::{Context, DomainError, Worker};

use crate::support::{quick_router_config, router, service, shared, wait_until};

// ============================================================================
// Create: row, event and projection
// ============================================================================

#[test]
fn created_symbol_reaches_the_worker_catalog() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 42);
    let catalog = SymbolCatalog::new();

    let mut router = router(&queue, quick_router_config());
    catalog.register(&mut router).unwrap();
    let worker = Worker::new(router, Context::new());
    worker.start().unwrap();

    let created = usecase
        .create(&Context::new(), Symbol::new("Bitcoin", "BTC-USD"))
        .unwrap();
    assert_eq!(created.id, 42);
    assert_eq!(store.committed(), 1);

    wait_until("catalog entry 42", || catalog.get(42).is_some());
    assert_eq!(catalog.get(42).unwrap().code, "BTC-USD");

    worker.stop().unwrap();

    let events = queue.published_on(SYMBOL_CREATED);
    assert_eq!(events.len(), 1);
    match decode_event(&events[0]).unwrap() {
        SymbolEvent::Created(event) => assert_eq!(event.id, 42),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(queue.acknowledged(), vec![events[0].uuid.clone()]);
}

#[test]
fn full_lifecycle_keeps_catalog_in_step() {
    let queue = InMemoryQueue::new();
    let (usecase, _store) = service(&queue, 1);
    let catalog = SymbolCatalog::new();

    let mut router = router(&queue, quick_router_config());
    catalog.register(&mut router).unwrap();
    let worker = Worker::new(router, Context::new());
    worker.start().unwrap();

    // Topics are consumed independently, so each step waits for the
    // previous event to be applied.
    let applied = |n: usize| wait_until("event applied", || queue.acknowledged().len() == n);
    let ctx = Context::new();
    let btc = usecase.create(&ctx, Symbol::new("Bitcoin", "BTC")).unwrap();
    applied(1);
    let eth = usecase.create(&ctx, Symbol::new("Ether", "ETH")).unwrap();
    applied(2);
    usecase
        .update(&ctx, btc.clone().with_description("digital gold"))
        .unwrap();
    applied(3);
    usecase.delete(&ctx, eth.id).unwrap();
    applied(4);

    worker.stop().unwrap();

    let entries = catalog.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, btc.id);
    assert_eq!(entries[0].description, "digital gold");
    assert_eq!(entries[0].version, 2);

    let stored = usecase.list(&ctx, &SymbolQuery::new()).unwrap();
    assert_eq!(stored.len(), 1);
}

// ============================================================================
// Failures roll back
// ============================================================================

#[test]
fn publish_failure_leaves_neither_row_nor_event() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 1);
    queue.reject_next_publishes(1);

    let err = usecase
        .create(&Context::new(), Symbol::new("Bitcoin", "BTC"))
        .unwrap_err();

    assert!(matches!(err, DomainError::DatabaseOperation(_)));
    assert!(store.is_empty());
    assert!(queue.is_empty());

    // The same call succeeds once the broker recovers.
    let created = usecase
        .create(&Context::new(), Symbol::new("Bitcoin", "BTC"))
        .unwrap();
    assert!(created.id > 0);
    assert_eq!(store.len(), 1);
    assert_eq!(queue.len(), 1);
}

#[test]
fn deleting_a_missing_symbol_touches_nothing() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 1);

    let err = usecase.delete(&Context::new(), 404).unwrap_err();

    assert!(matches!(err, DomainError::NotFound));
    assert_eq!(store.begun(), 0);
    assert!(queue.published_on(SYMBOL_DELETED).is_empty());
}

#[test]
fn rows_and_events_match_under_concurrent_failures() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 1);
    let usecase = Arc::new(usecase);
    queue.reject_next_publishes(5);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let usecase = usecase.clone();
            thread::spawn(move || {
                usecase.create(&Context::new(), Symbol::new(format!("Coin {i}"), format!("C{i}")))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let failed = results
        .iter()
        .filter(|r| matches!(r, Err(DomainError::DatabaseOperation(_))))
        .count();
    assert_eq!(failed, 5);
    assert_eq!(succeeded, 15);
    assert_eq!(store.len(), succeeded);
    assert_eq!(queue.published_on(SYMBOL_CREATED).len(), succeeded);

    for message in queue.published_on(SYMBOL_CREATED) {
        let id = decode_event(&message).unwrap().symbol_id();
        assert!(usecase.get(&Context::new(), id).is_ok());
    }
}

#[test]
fn refused_commit_never_reaches_the_bus() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 1);
    store.fail_commits(true);

    let err = usecase
        .create(&Context::new(), Symbol::new("Bitcoin", "BTC"))
        .unwrap_err();

    assert!(matches!(err, DomainError::DatabaseOperation(_)));
    assert!(store.is_empty());
    assert!(queue.is_empty());
}

#[test]
fn racing_creates_of_one_code_publish_exactly_one_event() {
    let queue = InMemoryQueue::new();
    let (usecase, store) = service(&queue, 1);
    let usecase = Arc::new(usecase);

    for round in 0..50 {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let usecase = usecase.clone();
                thread::spawn(move || {
                    usecase.create(
                        &Context::new(),
                        Symbol::new(format!("Coin {round}"), format!("R{round}")),
                    )
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, DomainError::Duplicate)));
    }

    let events = queue.published_on(SYMBOL_CREATED);
    assert_eq!(store.len(), 50);
    assert_eq!(events.len(), 50);
    for message in events {
        let id = decode_event(&message).unwrap().symbol_id();
        assert!(usecase.get(&Context::new(), id).is_ok());
    }
}

// ============================================================================
// Correlation
// ============================================================================

#[test]
fn request_context_follows_the_event_into_relayed_messages() {
    let queue = InMemoryQueue::new();
    let (usecase, _store) = service(&queue, 1);

    let mut router = router(&queue, quick_router_config());
    router
        .add_handler(SYMBOL_CREATED, "symbol.audit", |message| {
            let event = decode_event(message).map_err(HandlerError::from)?;
            Ok(vec![txpublish::bus::Message::with_string_payload(format!(
                "created {}",
                event.symbol_id()
            ))])
        })
        .unwrap();
    let router = shared(router);
    let worker = Worker::from_arc(router.clone(), Context::new());
    worker.start().unwrap();

    let mut ctx = Context::new()
        .with_correlation_id("corr-abc")
        .with_request_id("req-1");
    ctx.set("traceparent", "00-trace-span-01");
    usecase.create(&ctx, Symbol::new("Bitcoin", "BTC")).unwrap();

    wait_until("audit message", || queue.published_on("symbol.audit").len() == 1);
    worker.stop().unwrap();

    let event = queue.published_on(SYMBOL_CREATED).remove(0);
    assert_eq!(event.correlation_id(), Some("corr-abc"));
    assert_eq!(event.request_id(), Some("req-1"));
    assert_eq!(event.metadata("traceparent"), Some("00-trace-span-01"));

    let audit = queue.published_on("symbol.audit").remove(0);
    assert_eq!(audit.correlation_id(), Some("corr-abc"));
    assert_eq!(audit.request_id(), Some("req-1"));
    assert_eq!(audit.metadata("traceparent"), Some("00-trace-span-01"));
    assert_eq!(audit.payload_str(), Some("created 1"));
    assert_ne!(audit.metadata(keys::MESSAGE_ID), event.metadata(keys::MESSAGE_ID));
    assert_eq!(router.stats().handled, 1);
}

#[test]
fn generated_correlation_id_is_a_uuid() {
    let queue = InMemoryQueue::new();
    let (usecase, _store) = service(&queue, 1);

    usecase
        .create(&Context::new(), Symbol::new("Bitcoin", "BTC"))
        .unwrap();

    let event = queue.published_on(SYMBOL_CREATED).remove(0);
    let correlation_id = event.correlation_id().unwrap();
    assert_eq!(correlation_id.len(), 36);
    assert!(uuid::Uuid::parse_str(correlation_id).is_ok());
}
