//! Message handlers and their error type.

use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

use crate::bus::{CodecError, Message, PublishError};
use crate::error::DomainError;

/// A wrapped message handler. Returns the messages it produced, if any.
pub type HandlerFn = Arc<dyn Fn(&Message) -> Result<Vec<Message>, HandlerError> + Send + Sync>;

/// Error type for message handling.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded. Not retried.
    #[error("message decoding failed")]
    Decode(#[from] CodecError),
    /// The handler refused the message for good. Not retried.
    #[error("message rejected: {0}")]
    Rejected(String),
    /// The handler panicked; the recovery middleware caught it.
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }

    /// Whether another attempt at the same message can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Decode(_) | HandlerError::Rejected(_) => false,
            HandlerError::Domain(err) => err.is_retryable(),
            HandlerError::Panicked(_) | HandlerError::Publish(_) | HandlerError::Other(_) => true,
        }
    }
}

/// Wrap a handler that produces messages.
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: Fn(&Message) -> Result<Vec<Message>, HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a handler that only consumes.
pub fn consumer_fn<F>(f: F) -> HandlerFn
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(move |message: &Message| f(message).map(|()| Vec::new()))
}
