//! Handler middleware.
//!
//! Each middleware wraps the next handler and returns a new one. The router
//! installs the defaults around every handler, outermost first:
//!
//! ```text
//! CorrelationId -> Retry -> Recoverer -> handler
//! ```
//!
//! A panic inside the handler is turned into [`HandlerError::Panicked`] by
//! the recoverer, which the retry layer then retries like any other error.

use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use tracing::warn;

use super::handler::{HandlerError, HandlerFn};
use super::router::RouterConfig;
use crate::bus::{keys, Message};

/// Wraps a handler into another handler.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: HandlerFn) -> HandlerFn;
}

/// Copies the inbound correlation and request ids onto produced messages
/// that carry none.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationId;

impl Middleware for CorrelationId {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |message: &Message| {
            let mut produced = next(message)?;
            for out in &mut produced {
                for key in [keys::CORRELATION_ID, keys::REQUEST_ID] {
                    if out.metadata(key).is_some() {
                        continue;
                    }
                    if let Some(value) = message.metadata(key) {
                        out.set_metadata(key, value);
                    }
                }
            }
            Ok(produced)
        })
    }
}

/// Retries retryable handler errors with exponential backoff.
#[derive(Debug, Clone)]
pub struct Retry {
    max_retries: usize,
    initial_backoff: Duration,
    multiplier: f32,
    max_backoff: Duration,
}

impl Retry {
    pub fn new(max_retries: usize, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_factor(self.multiplier)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_retries)
    }
}

impl Middleware for Retry {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let policy = self.clone();
        Arc::new(move |message: &Message| {
            let attempt = Cell::new(0usize);
            let call = || {
                attempt.set(attempt.get() + 1);
                next(message)
            };
            call.retry(policy.backoff())
                .sleep(std::thread::sleep)
                .when(HandlerError::is_retryable)
                .notify(|err: &HandlerError, delay: Duration| {
                    warn!(
                        message_id = %message.uuid,
                        attempt = attempt.get(),
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "handler failed, retrying"
                    );
                })
                .call()
        })
    }
}

/// Converts handler panics into [`HandlerError::Panicked`].
#[derive(Debug, Clone, Default)]
pub struct Recoverer {
    panics: Option<Arc<AtomicU64>>,
}

impl Recoverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count recovered panics into `counter`.
    pub fn with_counter(counter: Arc<AtomicU64>) -> Self {
        Self {
            panics: Some(counter),
        }
    }
}

impl Middleware for Recoverer {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let panics = self.panics.clone();
        Arc::new(move |message: &Message| {
            match catch_unwind(AssertUnwindSafe(|| next(message))) {
                Ok(result) => result,
                Err(payload) => {
                    if let Some(counter) = &panics {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    let reason = panic_reason(payload.as_ref());
                    warn!(message_id = %message.uuid, panic = %reason, "handler panic recovered");
                    Err(HandlerError::Panicked(reason))
                }
            }
        })
    }
}

/// The message a panic was raised with.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
