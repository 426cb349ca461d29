//! Integration tests for [`RedpandaConnector`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Messages produced before the consumer starts are read from the beginning
//! - Delivery order within a partition
//! - Clean shutdown with an offset commit on close
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p changefeed-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use changefeed_core::{ConsumerSettings, StreamBinding};
use changefeed_redpanda::RedpandaConnector;
use changefeed_runtime::{CancellationToken, EngineReport, Orchestrator};
use changefeed_testing::RecordingHandler;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const TOPIC: &str = "customers.public.users";

/// Produce `payloads` in order, retrying while the broker warms up.
async fn produce(brokers: &str, payloads: &[&str]) {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()
        .expect("Failed to create producer");

    for payload in payloads {
        let mut attempt = 0;
        loop {
            let record = FutureRecord::to(TOPIC).key("1").payload(*payload);
            match producer.send(record, Duration::from_secs(5)).await {
                Ok(_) => break,
                Err((e, _)) => {
                    attempt += 1;
                    assert!(attempt < 60, "Kafka never accepted a message: {e}");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_consumes_change_events_from_kafka() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let payloads = [
        r#"{"payload":{"op":"c","after":{"id":1}}}"#,
        r#"{"payload":{"op":"u","after":{"id":1}}}"#,
        r#"{"payload":{"op":"d","before":{"id":1}}}"#,
    ];
    produce(&brokers, &payloads).await;

    let handler = Arc::new(RecordingHandler::new());
    let orchestrator = Orchestrator::new(Arc::new(RedpandaConnector::new()), handler.clone())
        .with_settings(ConsumerSettings::default());
    let bindings = [StreamBinding::new(vec![brokers], TOPIC, "users-group")];
    let engines = orchestrator
        .launch_all(&bindings)
        .await
        .expect("Failed to launch consumer");

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { orchestrator.run_all(token, engines).await }
    });

    assert!(
        handler.wait_for_count(payloads.len(), Duration::from_secs(60)).await,
        "Timed out waiting for messages, got {}",
        handler.count()
    );
    token.cancel();

    let reports = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("Consumer did not shut down")
        .expect("Run task failed")
        .expect("Consumer fleet failed");

    assert_eq!(handler.payloads_for(TOPIC), payloads);
    assert!(reports.iter().all(EngineReport::is_closed));
}
