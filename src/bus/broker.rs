//! Broker client seam.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use thiserror::Error;

use super::Message;

/// Error type for broker client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker was closed; nothing more can be published or consumed.
    #[error("broker closed")]
    Closed,
    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
    /// Internal state lock was poisoned.
    #[error("broker state poisoned during {0}")]
    Poisoned(&'static str),
}

/// The broker side of one subscription.
pub struct BrokerSubscription {
    /// Broker-assigned id, used to unsubscribe.
    pub id: u64,
    /// Deliveries for the subscribed topic. Disconnects when the broker
    /// drops the subscription.
    pub receiver: Receiver<Message>,
}

/// Client for an at-least-once, unordered message broker.
///
/// Implementations might include Kafka, NATS, RabbitMQ or the bundled
/// [`InMemoryQueue`](super::InMemoryQueue).
pub trait Broker: Send + Sync {
    /// Hand a message to the broker for `topic`.
    fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError>;

    /// Start receiving messages for `topic`.
    fn subscribe(&self, topic: &str) -> Result<BrokerSubscription, BrokerError>;

    /// Release the resources held for a subscription.
    fn unsubscribe(&self, topic: &str, subscription_id: u64) -> Result<(), BrokerError>;

    /// Acknowledge that a message was processed.
    fn ack(&self, topic: &str, message_id: &str) -> Result<(), BrokerError>;

    /// Reject a message; the broker may redeliver it.
    fn nack(&self, topic: &str, message_id: &str, reason: &str) -> Result<(), BrokerError>;

    /// Close the connection. Later calls are no-ops.
    fn close(&self) -> Result<(), BrokerError>;
}

impl<B: Broker + ?Sized> Broker for Arc<B> {
    fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str) -> Result<BrokerSubscription, BrokerError> {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str, subscription_id: u64) -> Result<(), BrokerError> {
        (**self).unsubscribe(topic, subscription_id)
    }

    fn ack(&self, topic: &str, message_id: &str) -> Result<(), BrokerError> {
        (**self).ack(topic, message_id)
    }

    fn nack(&self, topic: &str, message_id: &str, reason: &str) -> Result<(), BrokerError> {
        (**self).nack(topic, message_id, reason)
    }

    fn close(&self) -> Result<(), BrokerError> {
        (**self).close()
    }
}
