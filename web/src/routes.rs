//! Router configuration.

use crate::handlers::{create_order, health_check};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `GET /health`
/// - `POST /api/v1/orders`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/orders", post(create_order));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
