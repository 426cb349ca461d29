//! # Changefeed Redpanda
//!
//! Redpanda/Kafka broker connections for the changefeed consumer.
//!
//! This crate implements [`Connector`] and [`BrokerConnection`] on top of
//! rdkafka's [`BaseConsumer`], so the runtime's read loop can poll it from a
//! blocking thread with a bounded timeout.
//!
//! ## Why Redpanda?
//!
//! Redpanda speaks the Kafka protocol. Anything that does (Apache Kafka,
//! AWS MSK, Redpanda Cloud) works with this connector, which is what a
//! Debezium deployment publishes to.
//!
//! ## Configuration
//!
//! Every connection is created with:
//!
//! | librdkafka key | Source |
//! |---|---|
//! | `bootstrap.servers` | [`StreamBinding::bootstrap_servers`] |
//! | `group.id` | [`StreamBinding::group_id`] |
//! | `enable.auto.commit` | [`ConsumerSettings::auto_commit`] |
//! | `auto.offset.reset` | [`ConsumerSettings::offset_reset`] |
//! | `heartbeat.interval.ms` | [`ConsumerSettings::heartbeat_interval`] |
//! | `session.timeout.ms` | [`ConsumerSettings::session_timeout`] |
//!
//! Extra librdkafka properties can be layered on with
//! [`RedpandaConnectorBuilder::set`]; they win over the defaults above.
//!
//! ## Delivery Guarantees
//!
//! With auto-commit on, offsets are committed in the background and once
//! more, synchronously, when the connection is closed. A crash between
//! handling and commit redelivers messages: handlers must be idempotent.
//!
//! ## Example
//!
//! ```no_run
//! use changefeed_redpanda::RedpandaConnector;
//!
//! let connector = RedpandaConnector::builder()
//!     .set("client.id", "changefeed-consumer")
//!     .build();
//! ```

use changefeed_core::{
    BrokerConnection, BrokerError, ConsumedMessage, ConsumerSettings, Connector, StreamBinding,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Creates one rdkafka consumer per [`StreamBinding`].
#[derive(Debug, Clone, Default)]
pub struct RedpandaConnector {
    overrides: Vec<(String, String)>,
}

impl RedpandaConnector {
    /// A connector with no extra client properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for configuring the connector.
    #[must_use]
    pub fn builder() -> RedpandaConnectorBuilder {
        RedpandaConnectorBuilder::default()
    }

    /// The client configuration used for `binding`.
    #[must_use]
    pub fn client_config(&self, binding: &StreamBinding, settings: &ConsumerSettings) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", binding.bootstrap_servers())
            .set("group.id", binding.group_id())
            .set("enable.auto.commit", settings.auto_commit.to_string())
            .set("auto.offset.reset", settings.offset_reset.as_str())
            .set("heartbeat.interval.ms", millis(settings.heartbeat_interval))
            .set("session.timeout.ms", millis(settings.session_timeout))
            .set("enable.partition.eof", "false");
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config
    }
}

impl Connector for RedpandaConnector {
    fn connect(
        &self,
        binding: &StreamBinding,
        settings: &ConsumerSettings,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let consumer: BaseConsumer = self
            .client_config(binding, settings)
            .create()
            .map_err(|e| BrokerError::Connection(format!("Failed to create consumer: {e}")))?;

        tracing::debug!(
            brokers = %binding.bootstrap_servers(),
            group_id = binding.group_id(),
            overrides = self.overrides.len(),
            "Kafka consumer created"
        );

        Ok(Arc::new(RedpandaConnection {
            consumer,
            auto_commit: settings.auto_commit,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Builder for configuring a [`RedpandaConnector`].
///
/// # Example
///
/// ```no_run
/// use changefeed_redpanda::RedpandaConnector;
///
/// let connector = RedpandaConnector::builder()
///     .set("security.protocol", "SASL_SSL")
///     .set("sasl.mechanisms", "SCRAM-SHA-256")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct RedpandaConnectorBuilder {
    overrides: Vec<(String, String)>,
}

impl RedpandaConnectorBuilder {
    /// Set an arbitrary librdkafka property on every consumer.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Build the connector.
    #[must_use]
    pub fn build(self) -> RedpandaConnector {
        RedpandaConnector {
            overrides: self.overrides,
        }
    }
}

/// A [`BaseConsumer`] bound to one consumer group.
pub struct RedpandaConnection {
    consumer: BaseConsumer,
    auto_commit: bool,
    closed: AtomicBool,
}

impl BrokerConnection for RedpandaConnection {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn poll(&self, timeout: Duration) -> Option<Result<ConsumedMessage, BrokerError>> {
        if self.closed.load(Ordering::Acquire) {
            std::thread::sleep(timeout);
            return None;
        }
        self.consumer.poll(timeout).map(|result| {
            result
                .map(|message| to_consumed(&message))
                .map_err(|e| BrokerError::Read(e.to_string()))
        })
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let committed = if self.auto_commit {
            match self.consumer.commit_consumer_state(CommitMode::Sync) {
                Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
                Err(e) => Err(BrokerError::Close(format!("Failed to commit offsets: {e}"))),
            }
        } else {
            Ok(())
        };
        self.consumer.unsubscribe();
        committed
    }
}

fn to_consumed(message: &BorrowedMessage<'_>) -> ConsumedMessage {
    let mut consumed = ConsumedMessage::new(message.topic(), message.partition(), message.offset());
    if let Some(key) = message.key() {
        consumed = consumed.with_key(key);
    }
    if let Some(value) = message.payload() {
        consumed = consumed.with_value(value);
    }
    if let Some(timestamp_ms) = message.timestamp().to_millis() {
        consumed = consumed.with_timestamp_ms(timestamp_ms);
    }
    consumed
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use changefeed_core::OffsetReset;

    fn binding() -> StreamBinding {
        StreamBinding::new(
            vec!["127.0.0.1:19094".to_string(), "127.0.0.1:29094".to_string()],
            "customers.public.users",
            "users-group",
        )
    }

    #[test]
    fn redpanda_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<RedpandaConnector>();
        assert_send_sync::<RedpandaConnection>();
    }

    #[test]
    fn client_config_maps_binding_and_settings() {
        let config = RedpandaConnector::new().client_config(&binding(), &ConsumerSettings::default());

        assert_eq!(config.get("bootstrap.servers"), Some("127.0.0.1:19094,127.0.0.1:29094"));
        assert_eq!(config.get("group.id"), Some("users-group"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("2000"));
        assert_eq!(config.get("session.timeout.ms"), Some("6000"));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let settings = ConsumerSettings {
            offset_reset: OffsetReset::Latest,
            ..ConsumerSettings::default()
        };
        let config = RedpandaConnector::builder()
            .set("session.timeout.ms", "10000")
            .set("client.id", "changefeed-test")
            .build()
            .client_config(&binding(), &settings);

        assert_eq!(config.get("session.timeout.ms"), Some("10000"));
        assert_eq!(config.get("client.id"), Some("changefeed-test"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn connect_does_not_require_a_reachable_broker() {
        let connection = RedpandaConnector::new().connect(&binding(), &ConsumerSettings::default());
        assert!(connection.is_ok());
    }
}
