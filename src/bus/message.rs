//! Messages carried by the broker.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::codec::{CodecError, EventCodec};

/// Metadata keys the publish and consume paths read or stamp.
///
/// Any other key is treated as opaque trace context and copied through
/// unchanged.
pub mod keys {
    /// Unique message identity, mirrored from [`Message::uuid`](super::Message::uuid).
    pub const MESSAGE_ID: &str = "message_id";
    /// Identifier shared by a chain of related requests and messages.
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Identifier of the inbound request that caused the message.
    pub const REQUEST_ID: &str = "request_id";
    /// Broker routing key; defaults to the topic.
    pub const ROUTING_KEY: &str = "routing_key";
    /// Payload encoding, see [`EventCodec`](crate::bus::EventCodec).
    pub const CONTENT_TYPE: &str = "content_type";
    /// Reason a message was moved to the poison topic.
    pub const POISON_REASON: &str = "poison_reason";
    /// Topic the poisoned message was originally consumed from.
    pub const POISONED_TOPIC: &str = "poisoned_topic";

    /// Keys that describe one message rather than the request chain; they
    /// are never inherited from a context.
    pub const MESSAGE_SCOPED: [&str; 5] = [
        MESSAGE_ID,
        ROUTING_KEY,
        CONTENT_TYPE,
        POISON_REASON,
        POISONED_TOPIC,
    ];

    pub fn is_message_scoped(key: &str) -> bool {
        MESSAGE_SCOPED.contains(&key)
    }
}

/// A serialized payload plus its metadata.
///
/// `uuid` is left empty by [`Message::new`]; the publisher assigns one when
/// the message is sent. Metadata travels end-to-end untouched apart from the
/// keys the publisher fills in when they are absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message (empty until published)
    pub uuid: String,
    /// Serialized payload (binary or JSON, see `content_type` metadata)
    pub payload: Vec<u8>,
    /// Headers: ids, routing key, trace context
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Create a message without an identity.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            uuid: String::new(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Create a message with a caller-chosen identity.
    pub fn with_uuid(uuid: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            uuid: uuid.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Create a message with a string payload.
    pub fn with_string_payload(payload: impl Into<String>) -> Self {
        Self::new(payload.into().into_bytes())
    }

    /// Encode `value` with `codec` and stamp the matching content type.
    pub fn encode<T: Serialize>(codec: EventCodec, value: &T) -> Result<Self, CodecError> {
        let payload = codec.encode(value)?;
        Ok(Self::new(payload).with_metadata(keys::CONTENT_TYPE, codec.content_type()))
    }

    /// Decode the payload using the codec named by the `content_type`
    /// metadata, falling back to bitcode when the key is missing.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let codec = match self.metadata(keys::CONTENT_TYPE) {
            Some(content_type) => EventCodec::from_content_type(content_type)?,
            None => EventCodec::default(),
        };
        codec.decode(&self.payload)
    }

    /// Add metadata to the message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set a metadata entry, replacing any previous value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Look up a metadata entry. Empty values count as absent.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata(keys::CORRELATION_ID)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.metadata(keys::REQUEST_ID)
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.metadata(keys::ROUTING_KEY)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
