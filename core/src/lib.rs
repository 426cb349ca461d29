//! # Changefeed Core
//!
//! Core types and traits for consuming change-data-capture streams from a
//! Kafka-compatible broker.
//!
//! This crate has no runtime of its own. It defines the vocabulary shared by
//! the consumption runtime, the broker adapters and the test doubles:
//!
//! - [`StreamBinding`]: which topic to read, under which consumer group
//! - [`ConsumerSettings`]: liveness and offset policy for a connection
//! - [`ConsumedMessage`] and [`InboundEvent`]: what a read loop produces
//! - [`Handler`]: the pluggable sink invoked once per message
//! - [`Connector`] and [`BrokerConnection`]: the seam to the broker client
//! - [`ChangeEvent`]: decoding of Debezium change-event envelopes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   poll    ┌─────────────┐  InboundEvent  ┌───────────────┐
//! │  Broker  │ ────────► │  Read loop  │ ─────────────► │ Dispatch loop │
//! └──────────┘           └─────────────┘                └───────┬───────┘
//!                                                               │ handle()
//!                                                               ▼
//!                                                         ┌──────────┐
//!                                                         │ Handler  │
//!                                                         └──────────┘
//! ```

pub mod binding;
pub mod change_event;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;

pub use binding::{ConsumerSettings, OffsetReset, StreamBinding};
pub use change_event::{ChangeEvent, DecodeError, Operation, SourceInfo};
pub use connection::{BrokerConnection, Connector};
pub use error::BrokerError;
pub use handler::{ChangeEventHandler, Handler, StdoutHandler};
pub use message::{ConsumedMessage, InboundEvent};
