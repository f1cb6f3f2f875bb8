//! Event publisher.
//!
//! Every publish goes through [`prepare`], which fills in the metadata the
//! consumers rely on:
//!
//! | key | value when absent |
//! |-----|-------------------|
//! | `message_id` | the message uuid, generated if empty |
//! | `correlation_id` | the context's, else a fresh uuid |
//! | `request_id` | the context's, if any |
//! | `routing_key` | the topic |
//! | any other context value (`traceparent`, ...) | the context's |
//!
//! Values already present on the message are never overwritten.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use super::codec::CodecError;
use super::{keys, Broker, BrokerError, Message};
use crate::context::Context;

/// Error type for publish operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker refused or failed to take the message.
    #[error("publish to {topic} failed for message {message_id}")]
    Broker {
        topic: String,
        message_id: String,
        #[source]
        source: BrokerError,
    },
    /// An event helper was called without an event to publish.
    #[error("cannot publish {0}: no event given")]
    MissingEvent(&'static str),
    /// The event could not be serialized.
    #[error("event encoding failed")]
    Encode(#[from] CodecError),
}

/// Trait for publishing messages onto a named topic.
pub trait Publisher: Send + Sync {
    /// Publish a prepared message.
    fn publish_message(
        &self,
        ctx: &Context,
        topic: &str,
        message: Message,
    ) -> Result<(), PublishError>;

    /// Publish raw payload bytes. The bytes are copied; the caller's slice is
    /// left untouched.
    fn publish(&self, ctx: &Context, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.publish_message(ctx, topic, Message::new(payload.to_vec()))
    }
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish_message(
        &self,
        ctx: &Context,
        topic: &str,
        message: Message,
    ) -> Result<(), PublishError> {
        (**self).publish_message(ctx, topic, message)
    }
}

/// Generate a new message/correlation id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fill in identity and propagation metadata for `message` about to be
/// published on `topic`.
pub fn prepare(ctx: &Context, topic: &str, mut message: Message) -> Message {
    if message.uuid.is_empty() {
        message.uuid = new_id();
    }
    if message.metadata(keys::MESSAGE_ID).is_none() {
        let id = message.uuid.clone();
        message.set_metadata(keys::MESSAGE_ID, id);
    }
    if message.correlation_id().is_none() {
        let correlation_id = ctx.correlation_id().map_or_else(new_id, str::to_string);
        message.set_metadata(keys::CORRELATION_ID, correlation_id);
    }
    if message.request_id().is_none() {
        if let Some(request_id) = ctx.request_id() {
            message.set_metadata(keys::REQUEST_ID, request_id);
        }
    }
    if message.routing_key().is_none() {
        message.set_metadata(keys::ROUTING_KEY, topic);
    }
    for (key, value) in ctx.values() {
        if value.is_empty() || keys::is_message_scoped(key) || message.metadata(key).is_some() {
            continue;
        }
        message.set_metadata(key.clone(), value.clone());
    }
    message
}

/// Publisher that prepares metadata and hands messages to a [`Broker`].
///
/// Logs one structured line per attempt, keyed by message id.
#[derive(Clone)]
pub struct EventPublisher<B> {
    broker: B,
}

impl<B: Broker> EventPublisher<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    /// Get a reference to the underlying broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }
}

impl<B: Broker> Publisher for EventPublisher<B> {
    fn publish_message(
        &self,
        ctx: &Context,
        topic: &str,
        message: Message,
    ) -> Result<(), PublishError> {
        let message = prepare(ctx, topic, message);
        let message_id = message.uuid.clone();
        let correlation_id = message.correlation_id().unwrap_or_default().to_string();

        match self.broker.publish(topic, message) {
            Ok(()) => {
                info!(
                    message_id = %message_id,
                    topic = %topic,
                    correlation_id = %correlation_id,
                    "message published"
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    message_id = %message_id,
                    topic = %topic,
                    correlation_id = %correlation_id,
                    error = %source,
                    "message publish failed"
                );
                Err(PublishError::Broker {
                    topic: topic.to_string(),
                    message_id,
                    source,
                })
            }
        }
    }
}
