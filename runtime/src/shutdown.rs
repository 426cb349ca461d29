//! Termination signals mapped onto a [`CancellationToken`].
//!
//! ```rust,ignore
//! let shutdown = CancellationToken::new();
//! cancel_on_signal(shutdown.clone());
//!
//! orchestrator.run_all(shutdown, engines).await?;
//! ```

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for SIGINT, SIGTERM or SIGQUIT (Ctrl+C elsewhere).
///
/// If a signal handler cannot be registered, it is logged and the remaining
/// signals are still awaited.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let recv = |kind: SignalKind, name: &'static str| async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(signal = name, error = %e, "Failed to register signal handler");
                    std::future::pending::<()>().await;
                }
            }
            name
        };

        let received = tokio::select! {
            name = recv(SignalKind::interrupt(), "SIGINT") => name,
            name = recv(SignalKind::terminate(), "SIGTERM") => name,
            name = recv(SignalKind::quit(), "SIGQUIT") => name,
        };
        info!(signal = received, "Received shutdown signal");
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!(error = %e, "Failed to wait for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Cancel `token` on the first termination signal.
///
/// The listener also ends once `token` is cancelled by someone else.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_signal() => token.cancel(),
            () = token.cancelled() => {}
        }
    })
}
