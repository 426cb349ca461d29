//! Messages and events produced by a read loop.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};

/// A message read from a broker topic.
///
/// Key and value bytes are kept exactly as the broker returned them. Either
/// may be absent: Debezium publishes a tombstone (no value) after every
/// delete so that compacted topics can drop the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Message key, if any
    pub key: Option<Vec<u8>>,
    /// Message value, if any
    pub value: Option<Vec<u8>>,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Broker timestamp in milliseconds since the epoch, if known
    pub timestamp_ms: Option<i64>,
}

impl ConsumedMessage {
    /// Create a message with no key, value or timestamp.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: None,
            partition,
            offset,
            timestamp_ms: None,
        }
    }

    /// Set the message key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the message value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set the broker timestamp.
    #[must_use]
    pub const fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Whether this message is a tombstone (no value).
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// One outcome of a receive, sent from the read loop to the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message was received
    Message(ConsumedMessage),
    /// The receive failed; the read loop carries on
    ReadFailure(BrokerError),
}

impl From<Result<ConsumedMessage, BrokerError>> for InboundEvent {
    fn from(result: Result<ConsumedMessage, BrokerError>) -> Self {
        match result {
            Ok(message) => Self::Message(message),
            Err(error) => Self::ReadFailure(error),
        }
    }
}
