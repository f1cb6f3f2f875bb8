//! Payload encodings for domain events.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const BITCODE_CONTENT_TYPE: &str = "application/x-bitcode";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Error type for encoding and decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bitcode codec: {0}")]
    Bitcode(#[from] bitcode::Error),
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown content type: {0}")]
    UnknownContentType(String),
    #[error("unknown codec: {0} (expected `bitcode` or `json`)")]
    UnknownCodec(String),
}

/// Wire encoding for event payloads.
///
/// Bitcode is compact and the default; JSON is handy when the consumers are
/// not Rust services.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EventCodec {
    #[default]
    Bitcode,
    Json,
}

impl EventCodec {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            EventCodec::Bitcode => Ok(bitcode::serialize(value)?),
            EventCodec::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            EventCodec::Bitcode => Ok(bitcode::deserialize(bytes)?),
            EventCodec::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Value stamped into the `content_type` metadata key.
    pub fn content_type(self) -> &'static str {
        match self {
            EventCodec::Bitcode => BITCODE_CONTENT_TYPE,
            EventCodec::Json => JSON_CONTENT_TYPE,
        }
    }

    pub fn from_content_type(content_type: &str) -> Result<Self, CodecError> {
        match content_type {
            BITCODE_CONTENT_TYPE => Ok(EventCodec::Bitcode),
            JSON_CONTENT_TYPE => Ok(EventCodec::Json),
            other => Err(CodecError::UnknownContentType(other.to_string())),
        }
    }
}

impl fmt::Display for EventCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCodec::Bitcode => write!(f, "bitcode"),
            EventCodec::Json => write!(f, "json"),
        }
    }
}

impl FromStr for EventCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcode" => Ok(EventCodec::Bitcode),
            "json" => Ok(EventCodec::Json),
            _ => Err(CodecError::UnknownCodec(s.to_string())),
        }
    }
}
