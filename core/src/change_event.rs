//! Debezium change-event envelopes.
//!
//! Kafka Connect's JSON converter publishes each row change either wrapped
//! with its schema:
//!
//! ```text
//! {"schema": {...}, "payload": {"before": ..., "after": ..., "op": "c", ...}}
//! ```
//!
//! or, with `schemas.enable=false`, as the bare payload. [`ChangeEvent::from_slice`]
//! accepts both.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from decoding a change event.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The message has no value (a tombstone following a delete)
    #[error("Message is a tombstone")]
    Tombstone,

    /// The value is not a valid change-event envelope
    #[error("Invalid change event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Row inserted
    #[serde(rename = "c")]
    Create,
    /// Row updated
    #[serde(rename = "u")]
    Update,
    /// Row deleted
    #[serde(rename = "d")]
    Delete,
    /// Row read during the initial snapshot
    #[serde(rename = "r")]
    Read,
    /// Table truncated
    #[serde(rename = "t")]
    Truncate,
}

impl Operation {
    /// Short human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::Truncate => "truncate",
        }
    }
}

/// Where the change came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Connector type, e.g. `postgresql`
    #[serde(default)]
    pub connector: Option<String>,
    /// Logical server name (the topic prefix)
    #[serde(default)]
    pub name: Option<String>,
    /// Database name
    #[serde(default)]
    pub db: Option<String>,
    /// Schema name
    #[serde(default)]
    pub schema: Option<String>,
    /// Table name
    #[serde(default)]
    pub table: Option<String>,
    /// Time the change was made in the database
    #[serde(default)]
    pub ts_ms: Option<i64>,
    /// Log sequence number of the change
    #[serde(default)]
    pub lsn: Option<i64>,
}

/// A decoded row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Row image before the change (absent for inserts and snapshots)
    #[serde(default)]
    pub before: Option<Value>,
    /// Row image after the change (absent for deletes)
    #[serde(default)]
    pub after: Option<Value>,
    /// Source metadata
    #[serde(default)]
    pub source: Option<SourceInfo>,
    /// Kind of change
    pub op: Operation,
    /// Time the connector processed the change
    #[serde(default)]
    pub ts_ms: Option<i64>,
}

impl ChangeEvent {
    /// Decode a change event from a message value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] if `bytes` is not a change-event
    /// envelope, with or without the schema wrapper.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let body = match value {
            Value::Object(mut envelope)
                if envelope.contains_key("schema") && envelope.contains_key("payload") =>
            {
                envelope.remove("payload").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(body)?)
    }

    /// Decode a change event from an optional message value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Tombstone`] for a missing value, otherwise as
    /// [`from_slice`](Self::from_slice).
    pub fn from_value(value: Option<&[u8]>) -> Result<Self, DecodeError> {
        value.map_or(Err(DecodeError::Tombstone), Self::from_slice)
    }

    /// The most recent row image: `after`, or `before` for deletes.
    #[must_use]
    pub fn row(&self) -> Option<&Value> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Table the change applies to, if the source block names one.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.table.as_deref())
    }
}
