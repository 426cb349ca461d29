//! Integration tests for running a fleet of engines.
//!
//! Every test drives the orchestrator against scripted broker connections,
//! so no broker is needed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use changefeed_core::BrokerError;
use changefeed_runtime::{
    CancellationToken, EngineError, EngineReport, Orchestrator, OrchestratorError,
};
use changefeed_testing::{
    binding, init_tracing, PanickingHandler, RecordingHandler, ScriptedConnection,
    ScriptedConnector, Step,
};
use std::sync::Arc;
use std::time::Duration;

const USERS: &str = "customers.public.users";
const ORDERS: &str = "customers.public.orders";
const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Fixtures
// ============================================================================

fn orchestrator(connector: &Arc<ScriptedConnector>, handler: Arc<RecordingHandler>) -> Orchestrator {
    Orchestrator::new(connector.clone(), handler).with_poll_timeout(Duration::from_millis(10))
}

fn bindings() -> Vec<changefeed_core::StreamBinding> {
    vec![binding(USERS, "users-group"), binding(ORDERS, "orders-group")]
}

fn close_calls(connector: &ScriptedConnector, topic: &str) -> usize {
    connector.connection(topic).map_or(0, |c| c.close_calls())
}

// ============================================================================
// Delivery and shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_messages_on_one_stream_then_shutdown() {
    init_tracing();
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connection(ScriptedConnection::new(USERS).with_payloads(["m1", "m2", "m3"]))
            .with_connection(ScriptedConnection::new(ORDERS)),
    );
    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = orchestrator(&connector, handler.clone());

    let engines = orchestrator.launch_all(&bindings()).await.unwrap();
    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { orchestrator.run_all(token, engines).await }
    });

    assert!(handler.wait_for_count(3, WAIT).await);
    token.cancel();
    let reports = tokio::time::timeout(WAIT, run)
        .await
        .expect("run_all hung after shutdown")
        .unwrap()
        .unwrap();

    assert_eq!(handler.count(), 3);
    assert_eq!(handler.payloads_for(USERS), vec!["m1", "m2", "m3"]);
    assert!(handler.messages_for(ORDERS).is_empty());
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(EngineReport::is_closed));
    assert_eq!(close_calls(&connector, USERS), 1);
    assert_eq!(close_calls(&connector, ORDERS), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_all_waits_for_every_close() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connection(ScriptedConnection::new(USERS).with_payloads(["fast"]))
            .with_connection(
                ScriptedConnection::new(ORDERS).with_step(Step::Stall(Duration::from_millis(300))),
            ),
    );
    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = orchestrator(&connector, handler.clone());
    let engines = orchestrator.launch_all(&bindings()).await.unwrap();

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };
    let reports = orchestrator.run_all(token, engines).await.unwrap();
    canceller.await.unwrap();

    assert!(reports.iter().all(EngineReport::is_closed));
    assert_eq!(close_calls(&connector, USERS), 1);
    assert_eq!(close_calls(&connector, ORDERS), 1);
    assert_eq!(connector.connection(ORDERS).unwrap().polls_after_close(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stalled_stream_does_not_delay_another() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connection(
                ScriptedConnection::new(ORDERS).with_step(Step::Stall(Duration::from_secs(2))),
            )
            .with_connection(ScriptedConnection::new(USERS).with_payloads(["a", "b", "c"])),
    );
    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = orchestrator(&connector, handler.clone())
        .with_close_timeout(Duration::from_millis(100));
    let engines = orchestrator.launch_all(&bindings()).await.unwrap();

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { orchestrator.run_all(token, engines).await }
    });

    assert!(handler.wait_for_count(3, Duration::from_millis(500)).await);
    token.cancel();
    let reports = run.await.unwrap().unwrap();

    assert_eq!(handler.payloads_for(USERS), vec!["a", "b", "c"]);
    assert!(reports.iter().all(EngineReport::is_closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_failures_keep_the_fleet_running() {
    let connector = Arc::new(ScriptedConnector::new().with_connection(
        ScriptedConnection::new(USERS)
            .with_step(Step::Failure(BrokerError::Read("leader not available".to_string())))
            .with_payloads(["after-failure"]),
    ));
    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = orchestrator(&connector, handler.clone());
    let engines = orchestrator.launch_all(&bindings()).await.unwrap();

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { orchestrator.run_all(token, engines).await }
    });

    assert!(handler.wait_for_count(1, WAIT).await);
    token.cancel();
    let reports = run.await.unwrap().unwrap();

    assert_eq!(handler.payloads_for(USERS), vec!["after-failure"]);
    assert!(reports.iter().all(|r| r.outcome.is_ok()));
}

#[tokio::test]
async fn test_already_cancelled_token_closes_everything() {
    let connector = Arc::new(ScriptedConnector::new());
    let orchestrator = orchestrator(&connector, Arc::new(RecordingHandler::new()));
    let engines = orchestrator.launch_all(&bindings()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let reports = tokio::time::timeout(WAIT, orchestrator.run_all(token, engines))
        .await
        .expect("run_all hung")
        .unwrap();

    assert!(reports.iter().all(EngineReport::is_closed));
    assert_eq!(close_calls(&connector, USERS), 1);
    assert_eq!(close_calls(&connector, ORDERS), 1);
}

// ============================================================================
// Fatal failures
// ============================================================================

#[tokio::test]
async fn test_second_binding_connect_failure_aborts_launch() {
    let connector = Arc::new(ScriptedConnector::new().failing(ORDERS));
    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = orchestrator(&connector, handler.clone());

    let result = orchestrator.launch_all(&bindings()).await;

    match result {
        Err(OrchestratorError::Launch(EngineError::Connection { topic, group_id, .. })) => {
            assert_eq!(topic, ORDERS);
            assert_eq!(group_id, "orders-group");
        }
        other => panic!("expected launch failure, got {other:?}"),
    }
    let users = connector.connection(USERS).unwrap();
    assert!(!users.is_subscribed());
    assert_eq!(users.close_calls(), 1);
    assert_eq!(handler.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscription_failure_stops_the_fleet() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connection(ScriptedConnection::new(USERS))
            .with_connection(ScriptedConnection::new(ORDERS).failing_subscribe()),
    );
    let orchestrator = orchestrator(&connector, Arc::new(RecordingHandler::new()));
    let engines = orchestrator.launch_all(&bindings()).await.unwrap();

    let token = CancellationToken::new();
    let result = tokio::time::timeout(WAIT, orchestrator.run_all(token.clone(), engines))
        .await
        .expect("fleet kept running after a subscription failure");

    match result {
        Err(OrchestratorError::EngineFailed(EngineError::Subscription { topic, .. })) => {
            assert_eq!(topic, ORDERS);
        }
        other => panic!("expected subscription failure, got {other:?}"),
    }
    assert!(!token.is_cancelled());
    assert_eq!(close_calls(&connector, USERS), 1);
    assert_eq!(close_calls(&connector, ORDERS), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_panic_is_reported_and_engine_closed() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connection(ScriptedConnection::new(USERS).with_payloads(["poison"])),
    );
    let orchestrator = Orchestrator::new(connector.clone(), Arc::new(PanickingHandler))
        .with_poll_timeout(Duration::from_millis(10));
    let engines = orchestrator.launch_all(&[binding(USERS, "users-group")]).await.unwrap();

    let result = tokio::time::timeout(WAIT, orchestrator.run_all(CancellationToken::new(), engines))
        .await
        .expect("run_all hung after a handler panic");

    match result {
        Err(OrchestratorError::EngineFailed(EngineError::Panicked { topic, reason })) => {
            assert_eq!(topic, USERS);
            assert!(reason.contains("offset 0"), "unexpected panic reason: {reason}");
        }
        other => panic!("expected panic report, got {other:?}"),
    }
    assert_eq!(close_calls(&connector, USERS), 1);
}
