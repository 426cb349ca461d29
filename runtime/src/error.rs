//! Errors raised by engines and the orchestrator.

use crate::engine::EngineState;
use changefeed_core::BrokerError;
use thiserror::Error;

/// Errors from a single consumption engine.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The broker connection could not be created
    #[error("Failed to connect consumer for topic '{topic}' (group '{group_id}'): {source}")]
    Connection {
        /// Bound topic
        topic: String,
        /// Bound consumer group
        group_id: String,
        /// Underlying broker error
        #[source]
        source: BrokerError,
    },

    /// The engine could not subscribe to its topic
    #[error("Failed to subscribe to topic '{topic}': {source}")]
    Subscription {
        /// Bound topic
        topic: String,
        /// Underlying broker error
        #[source]
        source: BrokerError,
    },

    /// An operation was attempted in the wrong lifecycle state
    #[error("Engine for topic '{topic}' is {actual}, expected {expected}")]
    InvalidState {
        /// Bound topic
        topic: String,
        /// Required state
        expected: EngineState,
        /// Actual state
        actual: EngineState,
    },

    /// The engine's run future panicked (typically inside a handler)
    #[error("Engine for topic '{topic}' panicked: {reason}")]
    Panicked {
        /// Bound topic
        topic: String,
        /// Panic message, if it was a string
        reason: String,
    },
}

impl EngineError {
    /// Topic of the engine that raised the error.
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Connection { topic, .. }
            | Self::Subscription { topic, .. }
            | Self::InvalidState { topic, .. }
            | Self::Panicked { topic, .. } => topic,
        }
    }
}

/// Errors from launching or running a fleet of engines.
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// An engine could not be created; nothing was started
    #[error("Failed to launch consumers: {0}")]
    Launch(#[source] EngineError),

    /// An engine failed while running; the whole fleet was stopped
    #[error("Consumer fleet stopped after a fatal engine error: {0}")]
    EngineFailed(#[source] EngineError),
}
