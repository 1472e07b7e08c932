//! Application state for Axum handlers.

use order_intake_runtime::IntakeHandler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply, via `Arc`) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Intake pipeline for `POST /api/v1/orders`
    pub intake: Arc<IntakeHandler>,

    /// Cancelled when the server shuts down; in-flight publishes observe it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state with its own shutdown token.
    #[must_use]
    pub fn new(intake: Arc<IntakeHandler>) -> Self {
        Self {
            intake,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
