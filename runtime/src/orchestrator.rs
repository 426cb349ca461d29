//! Fleet lifecycle: launch one engine per binding, run them all, wait for all.

use crate::engine::{ConsumptionEngine, DEFAULT_CLOSE_TIMEOUT, DEFAULT_POLL_TIMEOUT, EngineState};
use crate::error::{EngineError, OrchestratorError};
use changefeed_core::{ConsumerSettings, Connector, Handler, StreamBinding};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Final outcome of one engine, produced once it has been closed.
#[derive(Debug, Clone)]
pub struct EngineReport {
    /// Binding the engine consumed
    pub binding: StreamBinding,
    /// State after close; `None` if the supervising task itself was lost
    pub final_state: Option<EngineState>,
    /// `Ok` if the engine ran until cancellation
    pub outcome: Result<(), EngineError>,
}

impl EngineReport {
    /// Whether the engine ended in the `Closed` state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.final_state == Some(EngineState::Closed)
    }
}

/// Completion barrier for a running fleet.
///
/// Maps each engine's binding to the task that runs and then closes it.
#[derive(Debug, Default)]
pub struct RunRegistry {
    entries: Vec<(StreamBinding, JoinHandle<EngineReport>)>,
}

impl RunRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the completion of the engine bound to `binding`.
    pub fn register(&mut self, binding: StreamBinding, completion: JoinHandle<EngineReport>) {
        self.entries.push((binding, completion));
    }

    /// Number of tracked engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no engine is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait for every tracked engine, in registration order.
    pub async fn wait_all(self) -> Vec<EngineReport> {
        let mut reports = Vec::with_capacity(self.entries.len());
        for (binding, completion) in self.entries {
            let report = match completion.await {
                Ok(report) => report,
                Err(e) => {
                    error!(topic = binding.topic(), error = %e, "Engine task failed");
                    EngineReport {
                        outcome: Err(EngineError::Panicked {
                            topic: binding.topic().to_string(),
                            reason: e.to_string(),
                        }),
                        binding,
                        final_state: None,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

/// Launches and supervises one [`ConsumptionEngine`] per [`StreamBinding`].
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(Arc::new(RedpandaConnector::new()), Arc::new(StdoutHandler))
///     .with_settings(ConsumerSettings::default());
///
/// let engines = orchestrator.launch_all(&bindings).await?;
/// let reports = orchestrator.run_all(shutdown.clone(), engines).await?;
/// ```
pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn Handler>,
    settings: ConsumerSettings,
    poll_timeout: Duration,
    close_timeout: Duration,
}

impl Orchestrator {
    /// An orchestrator with default consumer settings and timeouts.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, handler: Arc<dyn Handler>) -> Self {
        Self {
            connector,
            handler,
            settings: ConsumerSettings::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Consumer settings applied to every engine.
    #[must_use]
    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Read-loop poll timeout applied to every engine.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Close timeout applied to every engine.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Create one engine per binding, in order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Launch`] on the first binding that cannot
    /// be connected. Engines created before it are closed first.
    pub async fn launch_all(
        &self,
        bindings: &[StreamBinding],
    ) -> Result<Vec<ConsumptionEngine>, OrchestratorError> {
        let mut engines = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let created = ConsumptionEngine::create(
                binding.clone(),
                self.connector.as_ref(),
                &self.settings,
                Arc::clone(&self.handler),
            );
            match created {
                Ok(engine) => engines.push(
                    engine
                        .with_poll_timeout(self.poll_timeout)
                        .with_close_timeout(self.close_timeout),
                ),
                Err(e) => {
                    error!(topic = binding.topic(), group_id = binding.group_id(), error = %e, "Failed to create consumer");
                    for engine in &mut engines {
                        engine.close().await;
                    }
                    return Err(OrchestratorError::Launch(e));
                }
            }
        }
        Ok(engines)
    }

    /// Run every engine until `cancellation` fires, closing each one after its run.
    ///
    /// Blocks until every engine has been closed. A subscription failure or a
    /// panic in one engine cancels the whole fleet.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::EngineFailed`] with the first engine error,
    /// after every engine has been closed.
    pub async fn run_all(
        &self,
        cancellation: CancellationToken,
        engines: Vec<ConsumptionEngine>,
    ) -> Result<Vec<EngineReport>, OrchestratorError> {
        let fleet = cancellation.child_token();
        let mut registry = RunRegistry::new();
        for engine in engines {
            let binding = engine.binding().clone();
            registry.register(binding, tokio::spawn(supervise(engine, fleet.clone())));
        }
        info!(count = registry.len(), "All consumption engines are running");

        let reports = registry.wait_all().await;
        info!(count = reports.len(), "All consumption engines are closed");

        match reports.iter().find_map(|report| report.outcome.as_ref().err()) {
            Some(e) => Err(OrchestratorError::EngineFailed(e.clone())),
            None => Ok(reports),
        }
    }
}

async fn supervise(mut engine: ConsumptionEngine, fleet: CancellationToken) -> EngineReport {
    let topic = engine.binding().topic().to_string();
    let outcome = match AssertUnwindSafe(engine.run(fleet.clone())).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(panic) => Err(EngineError::Panicked {
            topic: topic.clone(),
            reason: panic_reason(panic.as_ref()),
        }),
    };
    if let Err(e) = &outcome {
        error!(topic, error = %e, "Consumer failed, stopping all consumers");
        fleet.cancel();
    }

    engine.close().await;
    EngineReport {
        binding: engine.binding().clone(),
        final_state: Some(engine.state()),
        outcome,
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use changefeed_testing::{binding, RecordingHandler, ScriptedConnector};

    #[test]
    fn panic_reason_reads_string_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_reason(static_str.as_ref()), "boom");
        assert_eq!(panic_reason(owned.as_ref()), "bang");
        assert_eq!(panic_reason(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn empty_fleet_returns_immediately() {
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedConnector::new()),
            Arc::new(RecordingHandler::new()),
        );

        let engines = orchestrator.launch_all(&[]).await.unwrap();
        let reports = orchestrator.run_all(CancellationToken::new(), engines).await.unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn launch_all_applies_settings_to_every_binding() {
        let connector = Arc::new(ScriptedConnector::new());
        let settings = ConsumerSettings {
            auto_commit: false,
            ..ConsumerSettings::default()
        };
        let orchestrator = Orchestrator::new(connector.clone(), Arc::new(RecordingHandler::new()))
            .with_settings(settings.clone());

        let mut engines = orchestrator
            .launch_all(&[binding("a", "ga"), binding("b", "gb")])
            .await
            .unwrap();

        assert_eq!(connector.connect_log(), vec!["a", "b"]);
        assert_eq!(connector.last_settings(), Some(settings));
        assert!(engines.iter().all(|e| e.state() == EngineState::Created));
        for engine in &mut engines {
            engine.close().await;
        }
    }

    #[tokio::test]
    async fn registry_waits_in_registration_order() {
        let mut registry = RunRegistry::new();
        for topic in ["first", "second"] {
            let report = EngineReport {
                binding: binding(topic, "g"),
                final_state: Some(EngineState::Closed),
                outcome: Ok(()),
            };
            registry.register(binding(topic, "g"), tokio::spawn(async move { report }));
        }
        assert_eq!(registry.len(), 2);

        let reports = registry.wait_all().await;
        let topics: Vec<_> = reports.iter().map(|r| r.binding.topic().to_string()).collect();
        assert_eq!(topics, vec!["first", "second"]);
        assert!(reports.iter().all(EngineReport::is_closed));
    }
}
