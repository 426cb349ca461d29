//! Stream bindings and consumer connection settings.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Binds one consumption engine to one topic and one consumer group.
///
/// A binding is immutable once built. The pair `(topic, group_id)` is
/// expected to be unique across a running fleet, but this is not checked.
///
/// # Example
///
/// ```
/// use changefeed_core::StreamBinding;
///
/// let binding = StreamBinding::new(
///     vec!["127.0.0.1:19094".to_string(), "127.0.0.1:29094".to_string()],
///     "customers.public.users",
///     "users-group",
/// );
/// assert_eq!(binding.bootstrap_servers(), "127.0.0.1:19094,127.0.0.1:29094");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamBinding {
    brokers: Vec<String>,
    topic: String,
    group_id: String,
}

impl StreamBinding {
    /// Create a binding for `topic`, consumed under `group_id`.
    #[must_use]
    pub fn new(brokers: Vec<String>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            group_id: group_id.into(),
        }
    }

    /// Broker addresses used to bootstrap the connection.
    #[must_use]
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Comma-separated broker list, as expected by `bootstrap.servers`.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Topic this binding reads from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group this binding joins.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl fmt::Display for StreamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.topic, self.group_id)
    }
}

/// Where a consumer group starts reading when it has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from the beginning of the topic.
    #[default]
    Earliest,
    /// Start from the end of the topic (only new messages).
    Latest,
}

impl OffsetReset {
    /// The value understood by `auto.offset.reset`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OffsetReset {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(Self::Earliest),
            "latest" | "largest" | "end" => Ok(Self::Latest),
            other => Err(BrokerError::InvalidSettings(format!(
                "unknown offset reset policy '{other}'"
            ))),
        }
    }
}

/// Connection settings applied to every consumer a connector creates.
///
/// The heartbeat interval must be strictly shorter than the session timeout
/// so the group coordinator notices a dead consumer well before it evicts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Interval between heartbeats to the group coordinator (default: 2s).
    pub heartbeat_interval: Duration,
    /// Session timeout after which the consumer is evicted (default: 6s).
    pub session_timeout: Duration,
    /// Let the client commit offsets periodically (default: true).
    pub auto_commit: bool,
    /// Start position for groups without committed offsets (default: earliest).
    pub offset_reset: OffsetReset,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            session_timeout: Duration::from_secs(6),
            auto_commit: true,
            offset_reset: OffsetReset::Earliest,
        }
    }
}

impl ConsumerSettings {
    /// Check the heartbeat/session pair.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidSettings`] if the heartbeat interval is
    /// zero or not strictly shorter than the session timeout.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.heartbeat_interval.is_zero() {
            return Err(BrokerError::InvalidSettings(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.session_timeout {
            return Err(BrokerError::InvalidSettings(format!(
                "heartbeat interval ({:?}) must be shorter than session timeout ({:?})",
                self.heartbeat_interval, self.session_timeout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn binding_accessors() {
        let binding = StreamBinding::new(
            vec!["a:1".to_string(), "b:2".to_string()],
            "orders",
            "orders-group",
        );
        assert_eq!(binding.topic(), "orders");
        assert_eq!(binding.group_id(), "orders-group");
        assert_eq!(binding.brokers().len(), 2);
        assert_eq!(binding.bootstrap_servers(), "a:1,b:2");
        assert_eq!(binding.to_string(), "orders@orders-group");
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ConsumerSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.auto_commit);
        assert_eq!(settings.offset_reset, OffsetReset::Earliest);
    }

    #[test]
    fn heartbeat_must_be_shorter_than_session() {
        let settings = ConsumerSettings {
            heartbeat_interval: Duration::from_secs(6),
            ..ConsumerSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(BrokerError::InvalidSettings(_))
        ));

        let settings = ConsumerSettings {
            heartbeat_interval: Duration::ZERO,
            ..ConsumerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn offset_reset_parses_aliases() {
        assert_eq!("earliest".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert_eq!("LATEST".parse::<OffsetReset>().unwrap(), OffsetReset::Latest);
        assert_eq!("smallest".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert!("sometimes".parse::<OffsetReset>().is_err());
        assert_eq!(OffsetReset::Latest.to_string(), "latest");
    }
}
