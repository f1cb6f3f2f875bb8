//! Logging setup.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter {level:?}")]
    Filter {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG`, when set and valid, wins over `level`. Returns `Ok(false)` if
/// a global subscriber was already installed, which leaves it in place.
pub fn init_tracing(level: &str, json: bool) -> Result<bool, TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|source| TelemetryError::Filter {
            level: level.to_string(),
            source,
        })?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .try_init()
        .is_ok();
    Ok(installed)
}
