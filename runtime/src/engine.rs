//! Per-stream consumption engine.
//!
//! A [`ConsumptionEngine`] owns one broker connection bound to one topic and
//! one consumer group. Running it splits the work in two:
//!
//! ```text
//!   blocking thread                         caller's task
//! ┌─────────────────┐   mpsc (cap. 1)   ┌──────────────────┐
//! │    read loop    │ ────────────────► │  dispatch loop   │──► Handler
//! │ poll(timeout)   │   InboundEvent    │ select! {        │
//! │ until stopped   │                   │   cancellation,  │
//! └─────────────────┘                   │   next event }   │
//!                                       └──────────────────┘
//! ```
//!
//! The read loop reserves a channel slot before each receive, so at most one
//! message sits between the broker and the handler. It polls with a bounded
//! timeout so it notices the stop token between receives; it never depends on
//! the connection being torn down to wake up. The dispatch loop only ends when the run's cancellation token
//! fires.
//!
//! # Lifecycle
//!
//! `Created → Subscribed → Running → Closed`. [`close`](ConsumptionEngine::close)
//! is valid from every state, so an engine whose subscription failed is still
//! closed by its owner.

use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use changefeed_core::{
    BrokerConnection, BrokerError, ConsumedMessage, ConsumerSettings, Connector, Handler,
    InboundEvent, StreamBinding,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long one read-loop poll waits before re-checking the stop token.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// How long `close` waits for the read loop before releasing the connection anyway.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`ConsumptionEngine`].
///
/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// Connection created, not subscribed
    Created,
    /// Subscribed to the bound topic
    Subscribed,
    /// Read and dispatch loops started
    Running,
    /// Connection released
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
            Self::Closed => "closed",
        })
    }
}

struct ReadLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Message pump for one [`StreamBinding`].
///
/// # Example
///
/// ```rust,ignore
/// let mut engine = ConsumptionEngine::create(binding, &connector, &settings, handler)?;
///
/// let token = CancellationToken::new();
/// engine.run(token.clone()).await?; // returns once `token` is cancelled
/// engine.close().await;
/// ```
pub struct ConsumptionEngine {
    binding: StreamBinding,
    connection: Arc<dyn BrokerConnection>,
    handler: Arc<dyn Handler>,
    poll_timeout: Duration,
    close_timeout: Duration,
    state: EngineState,
    reader: Option<ReadLoop>,
}

impl ConsumptionEngine {
    /// Open a broker connection for `binding`. Does not subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Connection`] if `settings` are inconsistent or
    /// the connector cannot create a connection.
    pub fn create(
        binding: StreamBinding,
        connector: &dyn Connector,
        settings: &ConsumerSettings,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, EngineError> {
        let connection = settings
            .validate()
            .and_then(|()| connector.connect(&binding, settings))
            .map_err(|source| EngineError::Connection {
                topic: binding.topic().to_string(),
                group_id: binding.group_id().to_string(),
                source,
            })?;

        info!(
            topic = binding.topic(),
            group_id = binding.group_id(),
            brokers = %binding.bootstrap_servers(),
            heartbeat_interval = ?settings.heartbeat_interval,
            session_timeout = ?settings.session_timeout,
            auto_commit = settings.auto_commit,
            offset_reset = %settings.offset_reset,
            "Consumer created"
        );

        Ok(Self {
            binding,
            connection,
            handler,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            state: EngineState::Created,
            reader: None,
        })
    }

    /// Set the read-loop poll timeout (default: 200ms).
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set how long `close` waits for the read loop (default: 10s).
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// The binding this engine consumes.
    #[must_use]
    pub const fn binding(&self) -> &StreamBinding {
        &self.binding
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Subscribe and pump messages to the handler until `cancellation` fires.
    ///
    /// The read loop runs on a blocking thread; the dispatch loop runs on the
    /// calling task. Read failures are logged and never end the run.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidState`] if the engine was already run or closed
    /// - [`EngineError::Subscription`] if the broker rejects the subscription
    pub async fn run(&mut self, cancellation: CancellationToken) -> Result<(), EngineError> {
        if self.state != EngineState::Created {
            return Err(EngineError::InvalidState {
                topic: self.binding.topic().to_string(),
                expected: EngineState::Created,
                actual: self.state,
            });
        }

        self.connection
            .subscribe(self.binding.topic())
            .map_err(|source| EngineError::Subscription {
                topic: self.binding.topic().to_string(),
                source,
            })?;
        self.state = EngineState::Subscribed;
        info!(
            topic = self.binding.topic(),
            group_id = self.binding.group_id(),
            "Subscribed to topic"
        );

        let (events_tx, mut events_rx) = mpsc::channel(1);
        let stop = cancellation.child_token();
        let task = tokio::task::spawn_blocking({
            let connection = Arc::clone(&self.connection);
            let stop = stop.clone();
            let topic = self.binding.topic().to_string();
            let poll_timeout = self.poll_timeout;
            let runtime = Handle::current();
            move || read_loop(&runtime, connection.as_ref(), &events_tx, &stop, poll_timeout, &topic)
        });
        self.reader = Some(ReadLoop { stop, task });
        self.state = EngineState::Running;
        EngineMetrics::record_started();

        self.dispatch(&mut events_rx, &cancellation).await;

        info!(topic = self.binding.topic(), "Consumer stopped dispatching");
        Ok(())
    }

    /// Stop the read loop and release the broker connection.
    ///
    /// Failures are logged, never returned: shutdown always makes progress.
    /// Calling `close` on a closed engine does nothing.
    pub async fn close(&mut self) {
        let topic = self.binding.topic().to_string();
        if self.state == EngineState::Closed {
            debug!(topic, "Consumer already closed");
            return;
        }

        if let Some(reader) = self.reader.take() {
            reader.stop.cancel();
            match tokio::time::timeout(self.close_timeout, reader.task).await {
                Ok(Ok(())) => debug!(topic, "Read loop joined"),
                Ok(Err(e)) => error!(topic, error = %e, "Read loop panicked"),
                Err(_) => warn!(
                    topic,
                    timeout = ?self.close_timeout,
                    "Read loop did not stop in time, releasing connection anyway"
                ),
            }
        }

        let connection = Arc::clone(&self.connection);
        match tokio::task::spawn_blocking(move || connection.close()).await {
            Ok(Ok(())) => info!(topic, group_id = self.binding.group_id(), "Consumer closed"),
            Ok(Err(e)) => error!(topic, error = %e, "Failed to close consumer"),
            Err(e) => error!(topic, error = %e, "Consumer close task panicked"),
        }

        if self.state == EngineState::Running {
            EngineMetrics::record_stopped();
        }
        self.state = EngineState::Closed;
    }

    async fn dispatch(
        &self,
        events: &mut mpsc::Receiver<InboundEvent>,
        cancellation: &CancellationToken,
    ) {
        let topic = self.binding.topic();
        loop {
            tokio::select! {
                biased;

                () = cancellation.cancelled() => {
                    debug!(topic, "Cancellation received");
                    return;
                }
                event = events.recv() => match event {
                    Some(InboundEvent::Message(message)) => self.deliver(&message).await,
                    Some(InboundEvent::ReadFailure(e)) => {
                        EngineMetrics::record_read_failure(topic);
                        error!(topic, error = %e, "Failed to receive message");
                    }
                    None => {
                        warn!(topic, "Read loop ended before cancellation, waiting for shutdown");
                        cancellation.cancelled().await;
                        return;
                    }
                }
            }
        }
    }

    async fn deliver(&self, message: &ConsumedMessage) {
        let started = Instant::now();
        self.handler.handle(message).await;
        EngineMetrics::record_handled(&message.topic, started.elapsed());
    }
}

impl Drop for ConsumptionEngine {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.stop.cancel();
        }
    }
}

impl fmt::Debug for ConsumptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumptionEngine")
            .field("binding", &self.binding)
            .field("state", &self.state)
            .field("poll_timeout", &self.poll_timeout)
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

fn read_loop(
    runtime: &Handle,
    connection: &dyn BrokerConnection,
    events: &mpsc::Sender<InboundEvent>,
    stop: &CancellationToken,
    poll_timeout: Duration,
    topic: &str,
) {
    info!(topic, "Waiting for messages");
    loop {
        // Hold a channel slot before taking anything from the broker, so at
        // most one read message waits for the dispatcher.
        let slot = runtime.block_on(async {
            tokio::select! {
                biased;

                () = stop.cancelled() => None,
                permit = events.reserve() => permit.ok(),
            }
        });
        let Some(permit) = slot else {
            debug!(topic, "Dispatch loop gone or stop requested");
            break;
        };

        let Some(result) = poll_until_stopped(connection, stop, poll_timeout) else {
            break;
        };
        permit.send(InboundEvent::from(result));
    }
    debug!(topic, "Read loop stopped");
}

fn poll_until_stopped(
    connection: &dyn BrokerConnection,
    stop: &CancellationToken,
    poll_timeout: Duration,
) -> Option<Result<ConsumedMessage, BrokerError>> {
    while !stop.is_cancelled() {
        if let Some(result) = connection.poll(poll_timeout) {
            return Some(result);
        }
    }
    None
}
