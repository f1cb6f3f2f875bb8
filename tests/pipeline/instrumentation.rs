//! Metrics decorators in the full publish path.

use std::sync::{Arc, Mutex};

use metrics::{
    Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};

use txpublish::bus::{EventPublisher, EventSubscriber, InMemoryQueue, Subscriber};
use txpublish::symbol::{InMemorySymbolStore, Symbol, SymbolEvents, SymbolUseCase, SymbolValidator};
use txpublish::{
    Context, MetricsPublisher, MetricsSubscriber, PUBLISH_ATTEMPTS, PUBLISH_DURATION,
    PUBLISH_ERRORS, PUBLISH_SUCCESS, SUBSCRIBE_ATTEMPTS, SUBSCRIBE_SUCCESS,
};

type Samples = Arc<Mutex<Vec<(String, String, f64)>>>;

/// Records every counter increment and histogram sample with its topic label.
#[derive(Clone, Default)]
struct CapturingRecorder {
    samples: Samples,
}

struct Handle {
    name: String,
    topic: String,
    samples: Samples,
}

impl Handle {
    fn push(&self, value: f64) {
        self.samples
            .lock()
            .unwrap()
            .push((self.name.clone(), self.topic.clone(), value));
    }
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        self.push(value as f64);
    }

    fn absolute(&self, value: u64) {
        self.push(value as f64);
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        self.push(value);
    }
}

impl CapturingRecorder {
    fn handle(&self, key: &Key) -> Arc<Handle> {
        let topic = key
            .labels()
            .find(|label| label.key() == "topic")
            .map(|label| label.value().to_string())
            .unwrap_or_default();
        Arc::new(Handle {
            name: key.name().to_string(),
            topic,
            samples: self.samples.clone(),
        })
    }

    /// Sum of the samples recorded under `name` for `topic`.
    fn total(&self, name: &str, topic: &str) -> f64 {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, t, _)| n == name && t == topic)
            .map(|(_, _, v)| v)
            .sum()
    }

    fn count(&self, name: &str) -> usize {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .count()
    }
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.handle(key))
    }
}

#[test]
fn use_case_publishes_are_counted_per_topic() {
    let queue = InMemoryQueue::new();
    let store = InMemorySymbolStore::new();
    let usecase = SymbolUseCase::new(
        store.clone(),
        store.clone(),
        SymbolEvents::new(MetricsPublisher::new(EventPublisher::new(queue.clone()))),
        SymbolValidator,
    );
    let recorder = CapturingRecorder::default();

    metrics::with_local_recorder(&recorder, || {
        let ctx = Context::new();
        let btc = usecase.create(&ctx, Symbol::new("Bitcoin", "BTC")).unwrap();
        usecase.create(&ctx, Symbol::new("Ether", "ETH")).unwrap();
        usecase.delete(&ctx, btc.id).unwrap();

        queue.reject_next_publishes(1);
        assert!(usecase.create(&ctx, Symbol::new("Doge", "DOGE")).is_err());
    });

    assert_eq!(recorder.total(PUBLISH_ATTEMPTS, "symbol.created"), 3.0);
    assert_eq!(recorder.total(PUBLISH_SUCCESS, "symbol.created"), 2.0);
    assert_eq!(recorder.total(PUBLISH_ERRORS, "symbol.created"), 1.0);
    assert_eq!(recorder.total(PUBLISH_SUCCESS, "symbol.deleted"), 1.0);
    assert_eq!(recorder.total(PUBLISH_ERRORS, "symbol.deleted"), 0.0);
    // One duration sample per attempt.
    assert_eq!(recorder.count(PUBLISH_DURATION), 4);
    assert_eq!(store.len(), 1);
}

#[test]
fn subscriptions_are_counted_per_topic() {
    let queue = InMemoryQueue::new();
    let subscriber = MetricsSubscriber::new(EventSubscriber::new(queue.clone()));
    let recorder = CapturingRecorder::default();

    let subscriptions = metrics::with_local_recorder(&recorder, || {
        ["symbol.created", "symbol.updated"]
            .into_iter()
            .map(|topic| subscriber.subscribe(&Context::new(), topic).unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(subscriptions.len(), 2);
    assert_eq!(recorder.total(SUBSCRIBE_ATTEMPTS, "symbol.created"), 1.0);
    assert_eq!(recorder.total(SUBSCRIBE_SUCCESS, "symbol.updated"), 1.0);
    assert_eq!(queue.subscriber_count("symbol.created"), 1);
}
