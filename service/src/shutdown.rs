//! Process signal handling.

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Completes on Ctrl+C or, on Unix, SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

/// Tokens for a two-stage shutdown.
///
/// `stop` is cancelled on the first signal; the process stops taking new
/// work. `abort` follows `grace` later and cancels work still in flight.
#[derive(Clone, Debug)]
pub struct Shutdown {
    /// Stop accepting new work
    pub stop: CancellationToken,
    /// Abandon in-flight work
    pub abort: CancellationToken,
}

impl Shutdown {
    /// Wire the tokens to [`shutdown_signal`].
    #[must_use]
    pub fn on_signal(grace: Duration) -> Self {
        let shutdown = Self::new();
        tokio::spawn(shutdown.clone().escalate_after(shutdown_signal(), grace));
        shutdown
    }

    fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    async fn escalate_after(self, trigger: impl std::future::Future<Output = ()>, grace: Duration) {
        trigger.await;
        self.stop.cancel();
        tokio::time::sleep(grace).await;
        if !self.abort.is_cancelled() {
            tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed");
        }
        self.abort.cancel();
    }
}
