//! The message router run loop.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use super::handler::{consumer_fn, handler_fn, HandlerError, HandlerFn};
use super::middleware::{panic_reason, CorrelationId, Middleware, Recoverer, Retry};
use crate::bus::{keys, Message, Publisher, SubscribeError, Subscriber, Subscription};
use crate::context::Context;
use crate::worker::Runnable;

/// Router settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Additional attempts after the first failure.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f32,
    pub max_backoff: Duration,
    /// How long an idle router waits before polling again.
    pub poll_interval: Duration,
    /// Where permanently failed messages are republished, if anywhere.
    pub poison_topic: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            poison_topic: None,
        }
    }
}

/// Lifecycle of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    Stopped = 0,
    Running = 1,
    Draining = 2,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RouterState::Running,
            2 => RouterState::Draining,
            _ => RouterState::Stopped,
        }
    }
}

/// Statistics from the router.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Messages handled and acknowledged.
    pub handled: u64,
    /// Messages nacked after their retries ran out.
    pub failed: u64,
    /// Panics caught while processing messages, including retried ones.
    pub panics: u64,
}

#[derive(Default)]
struct Counters {
    handled: AtomicU64,
    failed: AtomicU64,
    panics: Arc<AtomicU64>,
}

/// Error type for router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("a handler is already registered for topic {0}")]
    DuplicateHandler(String),
    #[error("handler for {0} produces messages but the router has no publisher")]
    NoPublisher(String),
    #[error("subscribing to {topic} failed")]
    Subscribe {
        topic: String,
        #[source]
        source: SubscribeError,
    },
    /// Every subscription ended while the router was still running.
    #[error("all subscriptions were lost")]
    SubscriptionsLost,
    #[error("router is closed")]
    Closed,
    #[error("closing the subscriber failed")]
    Close(#[source] SubscribeError),
}

struct Registration {
    topic: String,
    output_topic: Option<String>,
    handler: HandlerFn,
}

/// Marks the run loop finished however it exits, unwinding included, so
/// `close` never waits on a dead loop.
struct DoneGuard<'a, S: Subscriber>(&'a Router<S>);

impl<S: Subscriber> Drop for DoneGuard<'_, S> {
    fn drop(&mut self) {
        self.0.signal_done();
    }
}

struct Route {
    subscription: Subscription,
    output_topic: Option<String>,
    handler: HandlerFn,
}

/// Dispatches messages from subscribed topics to their handlers.
///
/// One thread runs [`Router::run`]; handlers are called serially. Every
/// handler is wrapped in the default middleware (correlation id, retry,
/// panic recovery). A message is acked once its handler succeeds and nacked
/// once its retries run out; either way the router moves on.
///
/// ## Example
///
/// ```ignore
/// let mut router = Router::new(EventSubscriber::new(queue.clone()), RouterConfig::default())
///     .with_publisher(EventPublisher::new(queue.clone()));
/// router.add_consumer("symbol.created", |msg| {
///     let event: SymbolCreated = msg.decode()?;
///     Ok(())
/// })?;
///
/// let worker = Worker::new(router, Context::new());
/// worker.start()?;
/// ```
pub struct Router<S> {
    subscriber: S,
    publisher: Option<Arc<dyn Publisher>>,
    config: RouterConfig,
    registrations: Vec<Registration>,
    middleware: Vec<Arc<dyn Middleware>>,
    state: AtomicU8,
    started: AtomicBool,
    closing: AtomicBool,
    stop_tx: Mutex<Sender<()>>,
    stop_rx: Mutex<Option<Receiver<()>>>,
    done: Mutex<bool>,
    done_signal: Condvar,
    counters: Counters,
}

impl<S: Subscriber> Router<S> {
    pub fn new(subscriber: S, config: RouterConfig) -> Self {
        let (stop_tx, stop_rx) = channel();
        Self {
            subscriber,
            publisher: None,
            config,
            registrations: Vec::new(),
            middleware: Vec::new(),
            state: AtomicU8::new(RouterState::Stopped as u8),
            started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            stop_tx: Mutex::new(stop_tx),
            stop_rx: Mutex::new(Some(stop_rx)),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
            counters: Counters::default(),
        }
    }

    /// Publisher for produced messages and poisoned ones.
    pub fn with_publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Add middleware around every handler, outside the defaults. The
    /// first added is the outermost.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn register(
        &mut self,
        topic: &str,
        output_topic: Option<String>,
        handler: HandlerFn,
    ) -> Result<(), RouterError> {
        if self.registrations.iter().any(|r| r.topic == topic) {
            return Err(RouterError::DuplicateHandler(topic.to_string()));
        }
        self.registrations.push(Registration {
            topic: topic.to_string(),
            output_topic,
            handler,
        });
        Ok(())
    }

    /// Register a handler that only consumes messages from `topic`.
    pub fn add_consumer<F>(&mut self, topic: &str, f: F) -> Result<(), RouterError>
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(topic, None, consumer_fn(f))
    }

    /// Register a handler whose produced messages are published to
    /// `output_topic`.
    pub fn add_handler<F>(&mut self, topic: &str, output_topic: &str, f: F) -> Result<(), RouterError>
    where
        F: Fn(&Message) -> Result<Vec<Message>, HandlerError> + Send + Sync + 'static,
    {
        self.register(topic, Some(output_topic.to_string()), handler_fn(f))
    }

    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RouterState::Running
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            handled: self.counters.handled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    fn chain(&self, handler: HandlerFn) -> HandlerFn {
        let handler = Recoverer::with_counter(self.counters.panics.clone()).wrap(handler);
        let handler = Retry::from_config(&self.config).wrap(handler);
        let handler = CorrelationId.wrap(handler);
        self.middleware
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware.wrap(next))
    }

    fn set_state(&self, state: RouterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn signal_done(&self) {
        self.set_state(RouterState::Stopped);
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.done_signal.notify_all();
    }

    /// Subscribe to every registered topic and dispatch until closed.
    ///
    /// Only the first call runs; later calls return `Ok(())` at once.
    /// Returns when [`Router::close`] is called or `ctx` is cancelled.
    pub fn run(&self, ctx: &Context) -> Result<(), RouterError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _done = DoneGuard(self);
        self.run_loop(ctx)
    }

    fn run_loop(&self, ctx: &Context) -> Result<(), RouterError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(RouterError::Closed);
        }
        let stop_rx = self
            .stop_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(RouterError::Closed)?;

        let run_ctx = ctx.child();
        let mut routes = Vec::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            if registration.output_topic.is_some() && self.publisher.is_none() {
                return Err(RouterError::NoPublisher(registration.topic.clone()));
            }
            let subscription = self
                .subscriber
                .subscribe(&run_ctx, &registration.topic)
                .map_err(|source| RouterError::Subscribe {
                    topic: registration.topic.clone(),
                    source,
                })?;
            routes.push(Route {
                subscription,
                output_topic: registration.output_topic.clone(),
                handler: self.chain(registration.handler.clone()),
            });
        }

        self.set_state(RouterState::Running);
        info!(topics = routes.len(), "router running");

        let result = self.dispatch(&run_ctx, &mut routes, &stop_rx);

        self.set_state(RouterState::Draining);
        for route in &routes {
            route.subscription.close();
        }
        info!(stats = ?self.stats(), "router stopped");
        result
    }

    fn dispatch(
        &self,
        ctx: &Context,
        routes: &mut Vec<Route>,
        stop_rx: &Receiver<()>,
    ) -> Result<(), RouterError> {
        let had_routes = !routes.is_empty();
        loop {
            if self.closing.load(Ordering::SeqCst) || ctx.is_cancelled() {
                return Ok(());
            }

            let mut idle = true;
            let mut lost = HashSet::new();
            for (index, route) in routes.iter().enumerate() {
                if self.closing.load(Ordering::SeqCst) {
                    break;
                }
                match route.subscription.try_recv() {
                    Ok(Some(message)) => {
                        idle = false;
                        if let Err(payload) =
                            catch_unwind(AssertUnwindSafe(|| self.process(route, message)))
                        {
                            self.counters.panics.fetch_add(1, Ordering::Relaxed);
                            error!(panic = %panic_reason(payload.as_ref()), "message processing panicked");
                        }
                    }
                    Ok(None) => {}
                    Err(SubscribeError::Cancelled) => return Ok(()),
                    Err(err) => {
                        warn!(topic = %route.subscription.topic(), error = %err, "subscription ended");
                        lost.insert(index);
                    }
                }
            }

            if !lost.is_empty() {
                let mut index = 0;
                routes.retain(|_| {
                    let keep = !lost.contains(&index);
                    index += 1;
                    keep
                });
                if had_routes && routes.is_empty() {
                    if self.closing.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    return Err(RouterError::SubscriptionsLost);
                }
            }

            if idle {
                match stop_rx.recv_timeout(self.config.poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        }
    }

    fn process(&self, route: &Route, message: Message) {
        let topic = route.subscription.topic();
        let span = info_span!(
            "message",
            message_id = %message.uuid,
            topic = %topic,
            correlation_id = message.correlation_id().unwrap_or_default(),
        );
        let _entered = span.enter();

        // User middleware and the publisher run outside the recoverer.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (route.handler)(&message).and_then(|produced| {
                self.forward(&message, route.output_topic.as_deref(), produced)
            })
        }))
        .unwrap_or_else(|payload| {
            self.counters.panics.fetch_add(1, Ordering::Relaxed);
            Err(HandlerError::Panicked(panic_reason(payload.as_ref())))
        });

        match outcome {
            Ok(()) => {
                if let Err(err) = route.subscription.ack(&message) {
                    warn!(error = %err, "ack failed");
                }
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
                debug!("message handled");
            }
            Err(err) => {
                error!(error = %err, "message handling failed, nacking");
                self.poison(topic, &message, &err);
                if let Err(nack_err) = route.subscription.nack(&message, &err.to_string()) {
                    warn!(error = %nack_err, "nack failed");
                }
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn forward(
        &self,
        inbound: &Message,
        output_topic: Option<&str>,
        produced: Vec<Message>,
    ) -> Result<(), HandlerError> {
        if produced.is_empty() {
            return Ok(());
        }
        let (Some(output_topic), Some(publisher)) = (output_topic, &self.publisher) else {
            warn!(count = produced.len(), "handler produced messages with nowhere to send them");
            return Ok(());
        };
        let ctx = Context::from_message(inbound);
        for message in produced {
            publisher.publish_message(&ctx, output_topic, message)?;
        }
        Ok(())
    }

    fn poison(&self, topic: &str, message: &Message, err: &HandlerError) {
        let (Some(poison_topic), Some(publisher)) = (&self.config.poison_topic, &self.publisher)
        else {
            return;
        };
        let poisoned = message
            .clone()
            .with_metadata(keys::POISON_REASON, err.to_string())
            .with_metadata(keys::POISONED_TOPIC, topic);
        let published = catch_unwind(AssertUnwindSafe(|| {
            publisher.publish_message(&Context::from_message(message), poison_topic, poisoned)
        }));
        match published {
            Ok(Ok(())) => {}
            Ok(Err(publish_err)) => {
                error!(error = %publish_err, poison_topic = %poison_topic, "poison publish failed");
            }
            Err(payload) => {
                error!(panic = %panic_reason(payload.as_ref()), poison_topic = %poison_topic, "poison publish panicked");
            }
        }
    }

    /// Stop dispatching, let the in-flight message finish, close every
    /// subscription and the subscriber. Blocks until the run loop has
    /// exited. Safe to call more than once.
    pub fn close(&self) -> Result<(), RouterError> {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = self
                .stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(());
        }

        if self.started.load(Ordering::SeqCst) {
            let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            while !*done {
                done = self
                    .done_signal
                    .wait(done)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        self.subscriber.close().map_err(RouterError::Close)
    }
}

impl<S: Subscriber + 'static> Runnable for Router<S> {
    fn run(&self, ctx: &Context) -> Result<(), RouterError> {
        Router::run(self, ctx)
    }

    fn close(&self) -> Result<(), RouterError> {
        Router::close(self)
    }
}
