//! Event subscriber and subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::{Broker, BrokerError, Message};
use crate::context::Context;

/// How long [`Subscription::iter`] blocks between cancellation checks.
const ITER_POLL: Duration = Duration::from_millis(50);

/// Error type for subscribe operations.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscribe to {topic} failed")]
    Broker {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("acknowledgement for message {message_id} failed")]
    Ack {
        message_id: String,
        #[source]
        source: BrokerError,
    },
    /// The subscription or the broker was closed.
    #[error("subscription closed")]
    Closed,
    /// The subscribing context was cancelled.
    #[error("subscription cancelled")]
    Cancelled,
}

/// Trait for subscribing to topics.
pub trait Subscriber: Send + Sync {
    /// Start receiving messages for `topic`. The subscription ends when
    /// `ctx` is cancelled or the subscription is closed.
    fn subscribe(&self, ctx: &Context, topic: &str) -> Result<Subscription, SubscribeError>;

    /// Release broker resources. Safe to call more than once.
    fn close(&self) -> Result<(), SubscribeError>;
}

impl<S: Subscriber + ?Sized> Subscriber for Arc<S> {
    fn subscribe(&self, ctx: &Context, topic: &str) -> Result<Subscription, SubscribeError> {
        (**self).subscribe(ctx, topic)
    }

    fn close(&self) -> Result<(), SubscribeError> {
        (**self).close()
    }
}

/// A live subscription to one topic.
///
/// Must be drained or closed; dropping it closes it.
pub struct Subscription {
    topic: String,
    id: u64,
    receiver: Receiver<Message>,
    broker: Arc<dyn Broker>,
    ctx: Context,
    closed: AtomicBool,
}

impl Subscription {
    /// Wrap a broker-side subscription. Used by [`Subscriber`]
    /// implementations.
    pub fn new(
        topic: impl Into<String>,
        id: u64,
        receiver: Receiver<Message>,
        broker: Arc<dyn Broker>,
        ctx: Context,
    ) -> Self {
        Self {
            topic: topic.into(),
            id,
            receiver,
            broker,
            ctx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn ensure_open(&self) -> Result<(), SubscribeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubscribeError::Closed);
        }
        if self.ctx.is_cancelled() {
            return Err(SubscribeError::Cancelled);
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time; an error means the
    /// subscription has ended and will yield nothing more.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, SubscribeError> {
        self.ensure_open()?;
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SubscribeError::Closed),
        }
    }

    /// Take the next message if one is already waiting.
    pub fn try_recv(&self) -> Result<Option<Message>, SubscribeError> {
        self.ensure_open()?;
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SubscribeError::Closed),
        }
    }

    /// Blocking iterator over messages, ending when the subscription ends.
    pub fn iter(&self) -> impl Iterator<Item = Message> + '_ {
        std::iter::from_fn(move || loop {
            match self.recv_timeout(ITER_POLL) {
                Ok(Some(message)) => return Some(message),
                Ok(None) => continue,
                Err(_) => return None,
            }
        })
    }

    pub fn ack(&self, message: &Message) -> Result<(), SubscribeError> {
        self.broker
            .ack(&self.topic, &message.uuid)
            .map_err(|source| SubscribeError::Ack {
                message_id: message.uuid.clone(),
                source,
            })
    }

    pub fn nack(&self, message: &Message, reason: &str) -> Result<(), SubscribeError> {
        self.broker
            .nack(&self.topic, &message.uuid, reason)
            .map_err(|source| SubscribeError::Ack {
                message_id: message.uuid.clone(),
                source,
            })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop receiving and release the broker-side sender. Later calls are
    /// no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.broker.unsubscribe(&self.topic, self.id) {
            Ok(()) => debug!(topic = %self.topic, subscription = self.id, "subscription closed"),
            // A closed broker has already released everything.
            Err(BrokerError::Closed) => {}
            Err(err) => warn!(topic = %self.topic, error = %err, "unsubscribe failed"),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscriber backed by a [`Broker`].
pub struct EventSubscriber<B> {
    broker: Arc<B>,
    closed: AtomicBool,
}

impl<B: Broker + 'static> EventSubscriber<B> {
    pub fn new(broker: B) -> Self {
        Self::from_arc(Arc::new(broker))
    }

    pub fn from_arc(broker: Arc<B>) -> Self {
        Self {
            broker,
            closed: AtomicBool::new(false),
        }
    }

    /// Get a reference to the underlying broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }
}

impl<B: Broker + 'static> Subscriber for EventSubscriber<B> {
    fn subscribe(&self, ctx: &Context, topic: &str) -> Result<Subscription, SubscribeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubscribeError::Closed);
        }
        if ctx.is_cancelled() {
            return Err(SubscribeError::Cancelled);
        }
        let inner = self
            .broker
            .subscribe(topic)
            .map_err(|source| SubscribeError::Broker {
                topic: topic.to_string(),
                source,
            })?;
        let broker: Arc<dyn Broker> = self.broker.clone();
        debug!(topic = %topic, subscription = inner.id, "subscribed");
        Ok(Subscription::new(
            topic,
            inner.id,
            inner.receiver,
            broker,
            ctx.child(),
        ))
    }

    fn close(&self) -> Result<(), SubscribeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.broker.close().map_err(|source| SubscribeError::Broker {
            topic: String::new(),
            source,
        })
    }
}
