//! Event bus - publishing and subscribing abstractions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Publisher / Subscriber (per service / worker)         │
//! │  publish(ctx, topic, payload) / subscribe(ctx, topic)        │
//! │  metadata: message_id, correlation_id, request_id, routing   │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Broker trait                           │
//! │  publish / subscribe / unsubscribe / ack / nack / close      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryQueue│    │ KafkaBroker │    │   NatsBroker        │
//! │ (included)  │    │ (external)  │    │    (external)       │
//! └─────────────┘    └─────────────┘    └─────────────────────┘
//! ```
//!
//! Delivery is at-least-once and unordered; consumers must be idempotent.

mod broker;
mod codec;
mod in_memory_queue;
mod message;
mod publisher;
mod subscriber;

pub use broker::{Broker, BrokerError, BrokerSubscription};
pub use codec::{CodecError, EventCodec};
pub use in_memory_queue::InMemoryQueue;
pub use message::{keys, Message};
pub use publisher::{new_id, prepare, EventPublisher, PublishError, Publisher};
pub use subscriber::{EventSubscriber, SubscribeError, Subscriber, Subscription};
