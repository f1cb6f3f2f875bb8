//! Transactional publish path and message-processing worker.
//!
//! Service side: a use case writes through a repository and publishes the
//! matching event inside one unit of work, so the write commits only if the
//! publish succeeded. Worker side: a router consumes the events with retry,
//! panic recovery and bounded shutdown.

pub mod bus;
pub mod config;
mod context;
mod error;
mod instrumented;
pub mod router;
pub mod symbol;
pub mod telemetry;
mod tx;
mod validate;
mod worker;

pub use config::{Config, ConfigError};
pub use context::Context;
pub use error::{map_data_error, DataError, DomainError};
pub use instrumented::{
    MetricsPublisher, MetricsSubscriber, PUBLISH_ATTEMPTS, PUBLISH_DURATION, PUBLISH_ERRORS,
    PUBLISH_SUCCESS, SUBSCRIBE_ATTEMPTS, SUBSCRIBE_DURATION, SUBSCRIBE_ERRORS, SUBSCRIBE_SUCCESS,
};
pub use tx::{TxManager, UnitOfWork};
pub use validate::{Rules, ValidationError, Validator, Violation};
pub use worker::{Runnable, Worker, WorkerError, DEFAULT_STOP_TIMEOUT};
