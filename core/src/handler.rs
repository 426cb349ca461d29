//! Handler trait and the built-in handlers.
//!
//! A [`Handler`] is the pluggable sink of a consumption engine. The engine
//! calls it once per successfully received message, in broker order, and
//! ignores whatever happens inside: a handler owns its own error handling.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use changefeed_core::{ConsumedMessage, Handler};
//!
//! struct ForwardingHandler {
//!     sink: MySink,
//! }
//!
//! #[async_trait]
//! impl Handler for ForwardingHandler {
//!     async fn handle(&self, message: &ConsumedMessage) {
//!         if let Err(e) = self.sink.forward(message).await {
//!             tracing::error!(error = %e, "Failed to forward message");
//!         }
//!     }
//! }
//! ```

use crate::change_event::{ChangeEvent, DecodeError};
use crate::message::ConsumedMessage;
use async_trait::async_trait;
use std::io::Write;
use tracing::{debug, info, warn};

/// Sink invoked once per received message.
///
/// # Thread Safety
///
/// One handler instance is shared by every engine of a fleet, so
/// implementors must be `Send + Sync + 'static`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Process one message.
    ///
    /// The engine waits for this future before dispatching the next message
    /// of the same stream.
    async fn handle(&self, message: &ConsumedMessage);
}

/// Writes each message value to standard output, one line per message.
///
/// Values are rendered as lossy UTF-8. A tombstone prints an empty line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutHandler;

impl StdoutHandler {
    /// The line written for `message`; empty for a tombstone.
    #[must_use]
    pub fn render(message: &ConsumedMessage) -> String {
        message
            .value
            .as_deref()
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Handler for StdoutHandler {
    async fn handle(&self, message: &ConsumedMessage) {
        let line = Self::render(message);
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            warn!(topic = %message.topic, error = %e, "Failed to write message to stdout");
        }
    }
}

/// Decodes Debezium change events and logs them.
///
/// Each event is logged at `info` with its operation and table; the row image
/// is logged at `debug`. Values that are not change events are reported at
/// `warn` and skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeEventHandler;

#[async_trait]
impl Handler for ChangeEventHandler {
    async fn handle(&self, message: &ConsumedMessage) {
        match ChangeEvent::from_value(message.value.as_deref()) {
            Ok(event) => {
                info!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    op = event.op.as_str(),
                    table = event.table().unwrap_or("unknown"),
                    "Change event received"
                );
                if let Some(row) = event.row() {
                    debug!(topic = %message.topic, offset = message.offset, row = %row, "Row image");
                }
            }
            Err(DecodeError::Tombstone) => {
                debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Tombstone received"
                );
            }
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to decode change event"
                );
            }
        }
    }
}
