//! The seam between the consumption runtime and a broker client.
//!
//! A [`Connector`] turns a [`StreamBinding`] into a live [`BrokerConnection`].
//! The runtime only ever talks to these traits, so the real client
//! (`changefeed-redpanda`) and the scripted test doubles
//! (`changefeed-testing`) are interchangeable.
//!
//! All methods are synchronous. Connections are polled from a dedicated
//! blocking thread, never from an async task.

use crate::binding::{ConsumerSettings, StreamBinding};
use crate::error::BrokerError;
use crate::message::ConsumedMessage;
use std::sync::Arc;
use std::time::Duration;

/// A live consumer connection bound to one consumer group.
///
/// # Thread Safety
///
/// The read loop polls from its own thread while the engine may call
/// [`close`](Self::close) from another, hence `Send + Sync`.
pub trait BrokerConnection: Send + Sync {
    /// Subscribe to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscription`] if the subscription is rejected.
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `None` when nothing arrived within `timeout`.
    fn poll(&self, timeout: Duration) -> Option<Result<ConsumedMessage, BrokerError>>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Close`] if the client failed to shut down cleanly.
    fn close(&self) -> Result<(), BrokerError>;
}

/// Factory for broker connections.
pub trait Connector: Send + Sync {
    /// Open a connection for `binding` with `settings` applied.
    ///
    /// The connection is not yet subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if the client cannot be created.
    fn connect(
        &self,
        binding: &StreamBinding,
        settings: &ConsumerSettings,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}
