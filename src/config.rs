//! Configuration for the symbol worker.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::bus::EventCodec;
use crate::router::RouterConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("backoff multiplier must be at least 1.0, got {0}")]
    Multiplier(f32),
    #[error("max backoff ({max_ms}ms) is below the initial backoff ({initial_ms}ms)")]
    BackoffRange { initial_ms: u64, max_ms: u64 },
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Log level (RUST_LOG overrides it)
    #[arg(long, env = "TXPUBLISH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "TXPUBLISH_JSON_LOGS")]
    pub json_logs: bool,

    /// Additional handler attempts after the first failure
    #[arg(long, env = "TXPUBLISH_MAX_RETRIES", default_value = "3")]
    pub max_retries: usize,

    /// Delay before the first retry, in milliseconds
    #[arg(long, env = "TXPUBLISH_INITIAL_BACKOFF_MS", default_value = "100")]
    pub initial_backoff_ms: u64,

    /// Growth factor between retries
    #[arg(long, env = "TXPUBLISH_BACKOFF_MULTIPLIER", default_value = "2.0")]
    pub backoff_multiplier: f32,

    /// Upper bound on the retry delay, in milliseconds
    #[arg(long, env = "TXPUBLISH_MAX_BACKOFF_MS", default_value = "1000")]
    pub max_backoff_ms: u64,

    /// How long an idle router waits between polls, in milliseconds
    #[arg(long, env = "TXPUBLISH_POLL_INTERVAL_MS", default_value = "50")]
    pub poll_interval_ms: u64,

    /// Bound on graceful shutdown, in seconds
    #[arg(long, env = "TXPUBLISH_STOP_TIMEOUT_SECS", default_value = "15")]
    pub stop_timeout_secs: u64,

    /// Topic that receives messages whose retries ran out
    #[arg(long, env = "TXPUBLISH_POISON_TOPIC")]
    pub poison_topic: Option<String>,

    /// Event payload encoding: bitcode or json
    #[arg(long, env = "TXPUBLISH_EVENT_CODEC", default_value = "bitcode")]
    pub event_codec: EventCodec,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial_ms: self.initial_backoff_ms,
                max_ms: self.max_backoff_ms,
            });
        }
        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poison_topic: self.poison_topic.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("symbol-worker").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_match_router_defaults() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.router_config(), RouterConfig::default());
        assert_eq!(config.stop_timeout(), Duration::from_secs(15));
        assert_eq!(config.event_codec, EventCodec::Bitcode);
        assert!(!config.json_logs);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--max-retries",
            "5",
            "--poll-interval-ms",
            "10",
            "--poison-topic",
            "symbols.poison",
            "--event-codec",
            "json",
            "--json-logs",
        ]);

        let router = config.router_config();
        assert_eq!(router.max_retries, 5);
        assert_eq!(router.poll_interval, Duration::from_millis(10));
        assert_eq!(router.poison_topic.as_deref(), Some("symbols.poison"));
        assert_eq!(config.event_codec, EventCodec::Json);
        assert!(config.json_logs);
    }

    #[test]
    fn unknown_codec_is_a_parse_error() {
        let result = Config::try_parse_from(["symbol-worker", "--event-codec", "xml"]);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert_eq!(
            parse(&["--poll-interval-ms", "0"]).validate(),
            Err(ConfigError::ZeroPollInterval)
        );
        assert_eq!(
            parse(&["--backoff-multiplier", "0.5"]).validate(),
            Err(ConfigError::Multiplier(0.5))
        );
        assert_eq!(
            parse(&["--initial-backoff-ms", "500", "--max-backoff-ms", "100"]).validate(),
            Err(ConfigError::BackoffRange {
                initial_ms: 500,
                max_ms: 100
            })
        );
    }
}
