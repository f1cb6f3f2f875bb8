//! Request-scoped context.
//!
//! Carries the request and correlation ids, free-form trace values, a
//! cancellation flag and whether the holder is running inside a unit of
//! work. Use cases, the transaction manager and the publisher all read from
//! it; the worker rebuilds one from each inbound message's metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::{keys, Message};

#[derive(Debug, Default)]
struct CancelToken {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    fn child_of(parent: &Arc<CancelToken>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            parent: Some(Arc::clone(parent)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// The context passed through every core operation.
///
/// Cheap to clone; clones share the same cancellation state. A
/// [`child`](Context::child) can be cancelled on its own without affecting
/// its parent, but observes the parent's cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, String>,
    cancel: Arc<CancelToken>,
    in_tx: bool,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from a map of values (request headers, session
    /// variables and the like).
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Rebuild a context from an inbound message's metadata so the ids keep
    /// flowing into whatever the handler does next.
    pub fn from_message(message: &Message) -> Self {
        Self::from_map(message.metadata.clone())
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.set(keys::REQUEST_ID, request_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.set(keys::CORRELATION_ID, correlation_id);
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.get(keys::REQUEST_ID)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(keys::CORRELATION_ID)
    }

    /// Get a value by key. Empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All values, including trace context the core does not interpret.
    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Derive a context with its own cancellation that still observes this
    /// one's.
    pub fn child(&self) -> Self {
        Self {
            values: self.values.clone(),
            cancel: Arc::new(CancelToken::child_of(&self.cancel)),
            in_tx: self.in_tx,
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether this context is bound to an open unit of work.
    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    pub(crate) fn bind_tx(&self) -> Self {
        let mut bound = self.child();
        bound.in_tx = true;
        bound
    }

    /// A span carrying the request fields, for request-scoped logging.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = self.request_id().unwrap_or_default(),
            correlation_id = self.correlation_id().unwrap_or_default(),
        )
    }
}
