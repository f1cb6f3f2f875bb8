//! Message router for the worker side.
//!
//! ```text
//!   Subscription(topic) ──► CorrelationId ──► Retry ──► Recoverer ──► handler
//!                                                                      │
//!            ack ◄── Ok ◄──────────────────────────────────────────────┤
//!           nack ◄── Err (retries exhausted) ──► poison topic (opt.)   │
//!                                                                      ▼
//!                                               produced messages ──► Publisher
//! ```

mod handler;
mod middleware;
#[allow(clippy::module_inception)]
mod router;

pub use handler::{consumer_fn, handler_fn, HandlerError, HandlerFn};
pub use middleware::{CorrelationId, Middleware, Recoverer, Retry};
pub use router::{Router, RouterConfig, RouterError, RouterState, RouterStats};
