//! # Changefeed Runtime
//!
//! Concurrent consumption of change-event streams.
//!
//! ## Core Components
//!
//! - **[`ConsumptionEngine`]**: one broker connection, one topic, one consumer
//!   group. A blocking read loop feeds an async dispatch loop that calls the
//!   [`Handler`](changefeed_core::Handler) in broker order.
//! - **[`Orchestrator`]**: creates one engine per binding, runs them in
//!   parallel under a shared [`CancellationToken`], and waits until every
//!   engine has been closed.
//! - **[`shutdown`]**: maps SIGINT, SIGTERM and SIGQUIT onto the token.
//! - **[`metrics`]**: Prometheus counters for handled messages and read failures.
//!
//! ## Example
//!
//! ```ignore
//! use changefeed_runtime::{CancellationToken, Orchestrator, shutdown};
//!
//! let orchestrator = Orchestrator::new(connector, handler).with_settings(settings);
//! let engines = orchestrator.launch_all(&bindings).await?;
//!
//! let token = CancellationToken::new();
//! shutdown::cancel_on_signal(token.clone());
//! orchestrator.run_all(token, engines).await?;
//! ```

/// Per-stream consumption engine
pub mod engine;

/// Error types for engines and the orchestrator
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Fleet launch, run and completion barrier
pub mod orchestrator;

/// Termination signal handling
pub mod shutdown;

pub use engine::{ConsumptionEngine, DEFAULT_CLOSE_TIMEOUT, DEFAULT_POLL_TIMEOUT, EngineState};
pub use error::{EngineError, OrchestratorError};
pub use orchestrator::{EngineReport, Orchestrator, RunRegistry};
pub use tokio_util::sync::CancellationToken;
