//! Configuration management for the changefeed consumer.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Missing variables take their default; malformed ones are rejected.

use changefeed_core::{
    BrokerError, ChangeEventHandler, ConsumerSettings, Handler, OffsetReset, StdoutHandler,
    StreamBinding,
};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BROKERS: &str = "127.0.0.1:19094,127.0.0.1:29094,127.0.0.1:39094";
const DEFAULT_STREAMS: &str =
    "customers.public.users=users-group,customers.public.orders=orders-group";

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// No stream bindings configured
    #[error("No streams configured in CHANGEFEED_STREAMS")]
    NoStreams,

    /// The consumer settings are inconsistent
    #[error("Invalid consumer settings: {0}")]
    Settings(#[from] BrokerError),
}

/// Which handler receives consumed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerKind {
    /// Print each value to stdout
    #[default]
    Stdout,
    /// Decode Debezium change events and log them
    ChangeEvent,
}

impl HandlerKind {
    /// Instantiate the handler.
    #[must_use]
    pub fn build(self) -> Arc<dyn Handler> {
        match self {
            Self::Stdout => Arc::new(StdoutHandler),
            Self::ChangeEvent => Arc::new(ChangeEventHandler),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::ChangeEvent => "change-event",
        })
    }
}

impl FromStr for HandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "change-event" | "change_event" | "debezium" => Ok(Self::ChangeEvent),
            other => Err(format!("unknown handler '{other}', expected stdout or change-event")),
        }
    }
}

/// One topic and the consumer group reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Topic name
    pub topic: String,
    /// Consumer group
    pub group_id: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub log_level: String,
    /// Bootstrap broker addresses
    pub brokers: Vec<String>,
    /// Streams to consume, one engine each
    pub streams: Vec<StreamConfig>,
    /// Settings applied to every consumer
    pub consumer: ConsumerSettings,
    /// Read-loop poll timeout
    pub poll_timeout: Duration,
    /// How long shutdown waits for each read loop
    pub close_timeout: Duration,
    /// Handler for consumed messages
    pub handler: HandlerKind,
    /// Prometheus listener address, if metrics are enabled
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed, no stream is
    /// configured, or the consumer settings are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let brokers_raw = lookup("KAFKA_BROKERS").unwrap_or_else(|| DEFAULT_BROKERS.to_string());
        let brokers = split_list(&brokers_raw);
        if brokers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "KAFKA_BROKERS",
                value: brokers_raw,
                reason: "no broker address".to_string(),
            });
        }

        let streams = parse_streams(
            &lookup("CHANGEFEED_STREAMS").unwrap_or_else(|| DEFAULT_STREAMS.to_string()),
        )?;

        let consumer = ConsumerSettings {
            heartbeat_interval: Duration::from_millis(parsed(&lookup, "KAFKA_HEARTBEAT_INTERVAL_MS", 2000)?),
            session_timeout: Duration::from_millis(parsed(&lookup, "KAFKA_SESSION_TIMEOUT_MS", 6000)?),
            auto_commit: parsed(&lookup, "KAFKA_ENABLE_AUTO_COMMIT", true)?,
            offset_reset: parsed(&lookup, "KAFKA_AUTO_OFFSET_RESET", OffsetReset::Earliest)?,
        };
        consumer.validate()?;

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            brokers,
            streams,
            consumer,
            poll_timeout: Duration::from_millis(parsed(&lookup, "CHANGEFEED_POLL_TIMEOUT_MS", 200)?),
            close_timeout: Duration::from_secs(parsed(&lookup, "CHANGEFEED_CLOSE_TIMEOUT_SECS", 10)?),
            handler: parsed(&lookup, "CHANGEFEED_HANDLER", HandlerKind::Stdout)?,
            metrics_addr: lookup("METRICS_ADDR")
                .filter(|v| !v.trim().is_empty())
                .map(|v| {
                    v.trim().parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                        key: "METRICS_ADDR",
                        value: v.clone(),
                        reason: e.to_string(),
                    })
                })
                .transpose()?,
        })
    }

    /// One binding per configured stream, all against the same brokers.
    #[must_use]
    pub fn bindings(&self) -> Vec<StreamBinding> {
        self.streams
            .iter()
            .map(|s| StreamBinding::new(self.brokers.clone(), s.topic.as_str(), s.group_id.as_str()))
            .collect()
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_streams(raw: &str) -> Result<Vec<StreamConfig>, ConfigError> {
    let streams = split_list(raw)
        .into_iter()
        .map(|entry| {
            let pair = entry
                .split_once('=')
                .map(|(topic, group)| (topic.trim().to_string(), group.trim().to_string()));
            match pair {
                Some((topic, group_id)) if !topic.is_empty() && !group_id.is_empty() => {
                    Ok(StreamConfig { topic, group_id })
                }
                _ => Err(ConfigError::Invalid {
                    key: "CHANGEFEED_STREAMS",
                    reason: "expected topic=group".to_string(),
                    value: entry,
                }),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    if streams.is_empty() {
        return Err(ConfigError::NoStreams);
    }
    Ok(streams)
}
