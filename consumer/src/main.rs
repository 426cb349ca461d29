//! Changefeed consumer.
//!
//! Reads Debezium change-event topics from Redpanda/Kafka, one consumer group
//! per topic, until SIGINT, SIGTERM or SIGQUIT.

mod config;

use changefeed_redpanda::RedpandaConnector;
use changefeed_runtime::metrics::MetricsServer;
use changefeed_runtime::{CancellationToken, Orchestrator, shutdown};
use config::Config;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    let log_level = config.as_ref().map_or("info", |c| c.log_level.as_str());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Application stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Application stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        brokers = %config.brokers.join(","),
        streams = config.streams.len(),
        handler = %config.handler,
        auto_commit = config.consumer.auto_commit,
        offset_reset = %config.consumer.offset_reset,
        "Configuration loaded"
    );

    let _metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            Some(server)
        }
        None => None,
    };

    let token = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(token.clone());

    let orchestrator = Orchestrator::new(Arc::new(RedpandaConnector::new()), config.handler.build())
        .with_settings(config.consumer.clone())
        .with_poll_timeout(config.poll_timeout)
        .with_close_timeout(config.close_timeout);

    let result = match orchestrator.launch_all(&config.bindings()).await {
        Ok(engines) => orchestrator.run_all(token.clone(), engines).await,
        Err(e) => Err(e),
    };

    token.cancel();
    if let Err(e) = signals.await {
        warn!(error = %e, "Signal listener failed");
    }

    let reports = result?;
    info!(engines = reports.len(), "All consumers closed");
    Ok(())
}
