//! Symbol domain events and the helpers that publish them.
//!
//! | topic | event |
//! |-------|-------|
//! | `symbol.created` | [`SymbolCreated`] |
//! | `symbol.updated` | [`SymbolUpdated`] |
//! | `symbol.deleted` | [`SymbolDeleted`] |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::Symbol;
use crate::bus::{CodecError, EventCodec, Message, PublishError, Publisher};
use crate::context::Context;
use crate::router::HandlerError;

pub const SYMBOL_CREATED: &str = "symbol.created";
pub const SYMBOL_UPDATED: &str = "symbol.updated";
pub const SYMBOL_DELETED: &str = "symbol.deleted";

/// Every symbol topic.
pub const SYMBOL_TOPICS: [&str; 3] = [SYMBOL_CREATED, SYMBOL_UPDATED, SYMBOL_DELETED];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCreated {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolUpdated {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDeleted {
    pub id: i64,
    pub name: String,
    pub code: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
}

impl From<&Symbol> for SymbolCreated {
    fn from(symbol: &Symbol) -> Self {
        Self {
            id: symbol.id,
            name: symbol.name.clone(),
            code: symbol.code.clone(),
            description: symbol.description.clone(),
            occurred_at: Utc::now(),
        }
    }
}

impl From<&Symbol> for SymbolUpdated {
    fn from(symbol: &Symbol) -> Self {
        Self {
            id: symbol.id,
            name: symbol.name.clone(),
            code: symbol.code.clone(),
            description: symbol.description.clone(),
            occurred_at: Utc::now(),
        }
    }
}

impl From<&Symbol> for SymbolDeleted {
    fn from(symbol: &Symbol) -> Self {
        Self {
            id: symbol.id,
            name: symbol.name.clone(),
            code: symbol.code.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Any symbol event, as decoded by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolEvent {
    Created(SymbolCreated),
    Updated(SymbolUpdated),
    Deleted(SymbolDeleted),
}

impl SymbolEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            SymbolEvent::Created(_) => SYMBOL_CREATED,
            SymbolEvent::Updated(_) => SYMBOL_UPDATED,
            SymbolEvent::Deleted(_) => SYMBOL_DELETED,
        }
    }

    pub fn symbol_id(&self) -> i64 {
        match self {
            SymbolEvent::Created(e) => e.id,
            SymbolEvent::Updated(e) => e.id,
            SymbolEvent::Deleted(e) => e.id,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeEventError {
    #[error("no symbol event is published on {0:?}")]
    UnknownTopic(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<DecodeEventError> for HandlerError {
    fn from(err: DecodeEventError) -> Self {
        match err {
            DecodeEventError::Codec(err) => HandlerError::Decode(err),
            unknown @ DecodeEventError::UnknownTopic(_) => HandlerError::rejected(unknown.to_string()),
        }
    }
}

/// Decode a symbol event, picking the type from the message's routing key
/// and the codec from its content type.
pub fn decode_event(message: &Message) -> Result<SymbolEvent, DecodeEventError> {
    match message.routing_key().unwrap_or_default() {
        SYMBOL_CREATED => Ok(SymbolEvent::Created(message.decode()?)),
        SYMBOL_UPDATED => Ok(SymbolEvent::Updated(message.decode()?)),
        SYMBOL_DELETED => Ok(SymbolEvent::Deleted(message.decode()?)),
        other => Err(DecodeEventError::UnknownTopic(other.to_string())),
    }
}

/// Maps symbols to events, encodes them and hands them to a [`Publisher`].
#[derive(Clone)]
pub struct SymbolEvents<P> {
    publisher: P,
    codec: EventCodec,
}

impl<P: Publisher> SymbolEvents<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            codec: EventCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: EventCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn codec(&self) -> EventCodec {
        self.codec
    }

    fn send<E: Serialize>(&self, ctx: &Context, topic: &str, event: &E) -> Result<(), PublishError> {
        let message = Message::encode(self.codec, event)?;
        self.publisher.publish_message(ctx, topic, message)
    }

    pub fn publish_symbol_created(
        &self,
        ctx: &Context,
        symbol: Option<&Symbol>,
    ) -> Result<(), PublishError> {
        let symbol = symbol.ok_or(PublishError::MissingEvent(SYMBOL_CREATED))?;
        self.send(ctx, SYMBOL_CREATED, &SymbolCreated::from(symbol))
    }

    pub fn publish_symbol_updated(
        &self,
        ctx: &Context,
        symbol: Option<&Symbol>,
    ) -> Result<(), PublishError> {
        let symbol = symbol.ok_or(PublishError::MissingEvent(SYMBOL_UPDATED))?;
        self.send(ctx, SYMBOL_UPDATED, &SymbolUpdated::from(symbol))
    }

    pub fn publish_symbol_deleted(
        &self,
        ctx: &Context,
        symbol: Option<&Symbol>,
    ) -> Result<(), PublishError> {
        let symbol = symbol.ok_or(PublishError::MissingEvent(SYMBOL_DELETED))?;
        self.send(ctx, SYMBOL_DELETED, &SymbolDeleted::from(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{keys, EventPublisher, InMemoryQueue};

    fn bitcoin() -> Symbol {
        Symbol::new("Bitcoin", "BTC").with_id(42).with_description("spot")
    }

    fn only_message(queue: &InMemoryQueue, topic: &str) -> Message {
        let messages = queue.published_on(topic);
        assert_eq!(messages.len(), 1);
        messages.into_iter().next().unwrap()
    }

    #[test]
    fn created_event_carries_the_symbol() {
        let queue = InMemoryQueue::new();
        let events = SymbolEvents::new(EventPublisher::new(queue.clone()));

        events
            .publish_symbol_created(&Context::new(), Some(&bitcoin()))
            .unwrap();

        let message = only_message(&queue, SYMBOL_CREATED);
        assert_eq!(message.routing_key(), Some(SYMBOL_CREATED));
        assert_eq!(
            message.metadata(keys::CONTENT_TYPE),
            Some(EventCodec::Bitcode.content_type())
        );
        match decode_event(&message).unwrap() {
            SymbolEvent::Created(event) => {
                assert_eq!(event.id, 42);
                assert_eq!(event.code, "BTC");
                assert_eq!(event.description, "spot");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn json_codec_is_readable() {
        let queue = InMemoryQueue::new();
        let events = SymbolEvents::new(EventPublisher::new(queue.clone())).with_codec(EventCodec::Json);

        events
            .publish_symbol_deleted(&Context::new(), Some(&bitcoin()))
            .unwrap();

        let message = only_message(&queue, SYMBOL_DELETED);
        let json: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["code"], "BTC");
        assert_eq!(decode_event(&message).unwrap().symbol_id(), 42);
    }

    #[test]
    fn missing_symbol_publishes_nothing() {
        let queue = InMemoryQueue::new();
        let events = SymbolEvents::new(EventPublisher::new(queue.clone()));
        let ctx = Context::new();

        assert!(matches!(
            events.publish_symbol_created(&ctx, None),
            Err(PublishError::MissingEvent(SYMBOL_CREATED))
        ));
        assert!(matches!(
            events.publish_symbol_updated(&ctx, None),
            Err(PublishError::MissingEvent(SYMBOL_UPDATED))
        ));
        assert!(matches!(
            events.publish_symbol_deleted(&ctx, None),
            Err(PublishError::MissingEvent(SYMBOL_DELETED))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn unknown_routing_key_is_rejected() {
        let message = Message::new(Vec::new()).with_metadata(keys::ROUTING_KEY, "orders.created");
        let err = decode_event(&message).unwrap_err();
        assert!(matches!(err, DecodeEventError::UnknownTopic(ref t) if t == "orders.created"));
        assert!(!HandlerError::from(err).is_retryable());
    }
}
