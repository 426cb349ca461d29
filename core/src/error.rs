//! Errors raised at the broker seam.

use thiserror::Error;

/// Errors that can occur while talking to the broker.
///
/// Broker client errors are carried as strings so that this type stays
/// `Clone` and independent of any particular client library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to create a connection to the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    Subscription {
        /// The topic that could not be subscribed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// A single receive failed
    #[error("Read failed: {0}")]
    Read(String),

    /// Releasing the connection failed
    #[error("Close failed: {0}")]
    Close(String),

    /// Connection settings are inconsistent
    #[error("Invalid consumer settings: {0}")]
    InvalidSettings(String),
}
