//! Order submission endpoint.

use crate::error::AppError;
use crate::extractors::IdempotencyKey;
use crate::state::AppState;
use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use order_intake_core::AcceptedResponse;

/// Accept an order for asynchronous processing.
///
/// The body is read as raw bytes so that malformed JSON is reported as an
/// invalid payload rather than rejected by the JSON extractor. Server
/// shutdown cancels an in-flight publish.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/orders
/// Idempotency-Key: <optional>
///
/// {"OrderId": "o1", "CustomerId": "c1", "Amount": 10}
/// ```
///
/// # Errors
///
/// - 400 when the body is not a valid order
/// - 5xx when the order could not be queued
pub async fn create_order(
    State(state): State<AppState>,
    idempotency_key: IdempotencyKey,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let cancel = state.shutdown.child_token();
    let accepted = state
        .intake
        .submit(idempotency_key.as_deref(), &body, &cancel)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
