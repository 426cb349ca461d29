//! # Changefeed Testing
//!
//! Test doubles for the changefeed consumption runtime.
//!
//! This crate provides:
//! - [`ScriptedConnector`] / [`ScriptedConnection`]: an in-memory broker whose
//!   reads follow a script of messages, failures, stalls and panics
//! - [`RecordingHandler`]: a handler that remembers every message it saw
//! - Helpers for bindings, payloads and tracing in tests
//! - proptest strategies for message payloads
//!
//! ## Example
//!
//! ```ignore
//! use changefeed_testing::{RecordingHandler, ScriptedConnection, ScriptedConnector, binding};
//!
//! #[tokio::test]
//! async fn delivers_in_order() {
//!     let connector = ScriptedConnector::new()
//!         .with_connection(ScriptedConnection::new("users").with_payloads(["a", "b"]));
//!     let handler = Arc::new(RecordingHandler::new());
//!     // build an engine or orchestrator with `connector` and `handler` ...
//!     assert!(handler.wait_for_count(2, Duration::from_secs(1)).await);
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory broker connections.
pub mod mocks {
    use super::lock;
    use async_trait::async_trait;
    use changefeed_core::{
        BrokerConnection, BrokerError, ConsumedMessage, ConsumerSettings, Connector, Handler,
        StreamBinding,
    };
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// One scripted outcome of [`BrokerConnection::poll`].
    #[derive(Debug, Clone)]
    pub enum Step {
        /// Return this message
        Message(ConsumedMessage),
        /// Return this read error
        Failure(BrokerError),
        /// Block the polling thread for this long, then report no message
        Stall(Duration),
        /// Panic inside `poll`, killing the read loop
        Panic,
    }

    /// A broker connection that replays a script.
    ///
    /// Once the script is exhausted, `poll` behaves like an idle broker: it
    /// sleeps for the requested timeout and returns `None`. Steps can be
    /// appended at any time with [`push`](Self::push).
    #[derive(Debug)]
    pub struct ScriptedConnection {
        topic: String,
        steps: Mutex<VecDeque<Step>>,
        next_offset: AtomicUsize,
        fail_subscribe: bool,
        fail_close: bool,
        subscribed: AtomicBool,
        closed: AtomicBool,
        close_calls: AtomicUsize,
        polls: AtomicUsize,
        reads: AtomicUsize,
        polls_after_close: AtomicUsize,
    }

    impl ScriptedConnection {
        /// An idle connection for `topic`.
        #[must_use]
        pub fn new(topic: impl Into<String>) -> Self {
            Self {
                topic: topic.into(),
                steps: Mutex::new(VecDeque::new()),
                next_offset: AtomicUsize::new(0),
                fail_subscribe: false,
                fail_close: false,
                subscribed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
                polls_after_close: AtomicUsize::new(0),
            }
        }

        /// Append one message per payload, with consecutive offsets on partition 0.
        #[must_use]
        pub fn with_payloads<I, P>(self, payloads: I) -> Self
        where
            I: IntoIterator<Item = P>,
            P: Into<Vec<u8>>,
        {
            for payload in payloads {
                self.push_payload(payload);
            }
            self
        }

        /// Append a step to the script.
        #[must_use]
        pub fn with_step(self, step: Step) -> Self {
            self.push(step);
            self
        }

        /// Reject the subscription.
        #[must_use]
        pub const fn failing_subscribe(mut self) -> Self {
            self.fail_subscribe = true;
            self
        }

        /// Report an error from `close`.
        #[must_use]
        pub const fn failing_close(mut self) -> Self {
            self.fail_close = true;
            self
        }

        /// Append a step to the script of a live connection.
        pub fn push(&self, step: Step) {
            lock(&self.steps).push_back(step);
        }

        /// Append a message carrying `payload` at the next offset.
        pub fn push_payload(&self, payload: impl Into<Vec<u8>>) {
            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            let message = ConsumedMessage::new(self.topic.clone(), 0, i64::try_from(offset).unwrap_or(i64::MAX))
                .with_value(payload);
            self.push(Step::Message(message));
        }

        /// Topic this connection serves.
        #[must_use]
        pub fn topic(&self) -> &str {
            &self.topic
        }

        /// Whether `subscribe` succeeded.
        #[must_use]
        pub fn is_subscribed(&self) -> bool {
            self.subscribed.load(Ordering::SeqCst)
        }

        /// Whether `close` has been called at least once.
        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// Number of `close` calls.
        #[must_use]
        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        /// Number of `poll` calls.
        #[must_use]
        pub fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        /// Number of `poll` calls that returned a message or a read error.
        #[must_use]
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        /// Number of `poll` calls made after `close`.
        #[must_use]
        pub fn polls_after_close(&self) -> usize {
            self.polls_after_close.load(Ordering::SeqCst)
        }

        /// Steps not yet consumed.
        #[must_use]
        pub fn remaining(&self) -> usize {
            lock(&self.steps).len()
        }
    }

    impl BrokerConnection for ScriptedConnection {
        fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
            if self.fail_subscribe {
                return Err(BrokerError::Subscription {
                    topic: topic.to_string(),
                    reason: "subscription rejected by script".to_string(),
                });
            }
            self.subscribed.store(true, Ordering::SeqCst);
            Ok(())
        }

        #[allow(clippy::panic)]
        fn poll(&self, timeout: Duration) -> Option<Result<ConsumedMessage, BrokerError>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.is_closed() {
                self.polls_after_close.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(timeout);
                return None;
            }

            let step = lock(&self.steps).pop_front();
            match step {
                Some(Step::Message(message)) => {
                    self.reads.fetch_add(1, Ordering::SeqCst);
                    Some(Ok(message))
                }
                Some(Step::Failure(error)) => {
                    self.reads.fetch_add(1, Ordering::SeqCst);
                    Some(Err(error))
                }
                Some(Step::Stall(duration)) => {
                    std::thread::sleep(duration);
                    None
                }
                Some(Step::Panic) => panic!("scripted read failure on {}", self.topic),
                None => {
                    std::thread::sleep(timeout);
                    None
                }
            }
        }

        fn close(&self) -> Result<(), BrokerError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(BrokerError::Close("close rejected by script".to_string()));
            }
            Ok(())
        }
    }

    /// Connector handing out [`ScriptedConnection`]s by topic.
    ///
    /// Topics without a registered connection get a fresh idle one.
    #[derive(Debug, Default)]
    pub struct ScriptedConnector {
        connections: Mutex<HashMap<String, Arc<ScriptedConnection>>>,
        failing_topics: HashSet<String>,
        connect_log: Mutex<Vec<String>>,
        last_settings: Mutex<Option<ConsumerSettings>>,
    }

    impl ScriptedConnector {
        /// A connector with no scripted connections.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register the connection returned for its topic.
        #[must_use]
        pub fn with_connection(self, connection: ScriptedConnection) -> Self {
            lock(&self.connections).insert(connection.topic().to_string(), Arc::new(connection));
            self
        }

        /// Fail every `connect` for `topic`.
        #[must_use]
        pub fn failing(mut self, topic: impl Into<String>) -> Self {
            self.failing_topics.insert(topic.into());
            self
        }

        /// The connection registered (or created) for `topic`.
        #[must_use]
        pub fn connection(&self, topic: &str) -> Option<Arc<ScriptedConnection>> {
            lock(&self.connections).get(topic).cloned()
        }

        /// Topics passed to `connect`, in call order.
        #[must_use]
        pub fn connect_log(&self) -> Vec<String> {
            lock(&self.connect_log).clone()
        }

        /// Settings passed to the most recent `connect`.
        #[must_use]
        pub fn last_settings(&self) -> Option<ConsumerSettings> {
            lock(&self.last_settings).clone()
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(
            &self,
            binding: &StreamBinding,
            settings: &ConsumerSettings,
        ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
            lock(&self.connect_log).push(binding.topic().to_string());
            *lock(&self.last_settings) = Some(settings.clone());

            if self.failing_topics.contains(binding.topic()) {
                return Err(BrokerError::Connection(format!(
                    "no route to brokers {}",
                    binding.bootstrap_servers()
                )));
            }

            let connection: Arc<dyn BrokerConnection> = Arc::<ScriptedConnection>::clone(
                lock(&self.connections)
                    .entry(binding.topic().to_string())
                    .or_insert_with(|| Arc::new(ScriptedConnection::new(binding.topic()))),
            );
            Ok(connection)
        }
    }

    /// Handler that records every message it receives.
    #[derive(Debug, Default)]
    pub struct RecordingHandler {
        messages: Mutex<Vec<ConsumedMessage>>,
        delay: Option<Duration>,
    }

    impl RecordingHandler {
        /// A handler with no processing delay.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Sleep for `delay` inside every `handle` call.
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// All messages received so far, in order.
        #[must_use]
        pub fn messages(&self) -> Vec<ConsumedMessage> {
            lock(&self.messages).clone()
        }

        /// Messages received from `topic`, in order.
        #[must_use]
        pub fn messages_for(&self, topic: &str) -> Vec<ConsumedMessage> {
            lock(&self.messages)
                .iter()
                .filter(|m| m.topic == topic)
                .cloned()
                .collect()
        }

        /// Values received from `topic` as UTF-8 strings, in order.
        #[must_use]
        pub fn payloads_for(&self, topic: &str) -> Vec<String> {
            self.messages_for(topic)
                .iter()
                .filter_map(|m| m.value.as_deref())
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()
        }

        /// Number of messages received.
        #[must_use]
        pub fn count(&self) -> usize {
            lock(&self.messages).len()
        }

        /// Wait until at least `count` messages arrived or `timeout` elapsed.
        ///
        /// Returns whether the count was reached.
        pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            loop {
                if self.count() >= count {
                    return true;
                }
                if Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn handle(&self, message: &ConsumedMessage) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            lock(&self.messages).push(message.clone());
        }
    }

    /// Handler that panics on every message.
    #[derive(Debug, Default)]
    pub struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        #[allow(clippy::panic)]
        async fn handle(&self, message: &ConsumedMessage) {
            panic!("handler failed on offset {}", message.offset);
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use changefeed_core::StreamBinding;

    /// Broker list used by test bindings.
    pub const TEST_BROKERS: &str = "127.0.0.1:19094,127.0.0.1:29094,127.0.0.1:39094";

    /// A binding for `topic` under `group_id` against [`TEST_BROKERS`].
    #[must_use]
    pub fn binding(topic: &str, group_id: &str) -> StreamBinding {
        StreamBinding::new(
            TEST_BROKERS.split(',').map(str::to_string).collect(),
            topic,
            group_id,
        )
    }

    /// Numbered JSON payloads: `{"seq":0}`, `{"seq":1}`, ...
    #[must_use]
    pub fn numbered_payloads(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{{\"seq\":{i}}}")).collect()
    }

    /// Install a test-friendly tracing subscriber (once per process).
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "changefeed=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::collection::vec;
    use proptest::prelude::*;

    /// Arbitrary message payloads, including empty and non-UTF-8 bytes.
    pub fn payload() -> impl Strategy<Value = Vec<u8>> {
        vec(any::<u8>(), 0..256)
    }

    /// Sequences of up to `max_len` payloads.
    pub fn payload_sequence(max_len: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
        vec(payload(), 0..=max_len)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Re-export commonly used items
pub use helpers::{binding, init_tracing, numbered_payloads};
pub use mocks::{PanickingHandler, RecordingHandler, ScriptedConnection, ScriptedConnector, Step};
