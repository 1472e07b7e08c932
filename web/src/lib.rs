//! HTTP surface for order intake.
//!
//! A thin Axum shell over [`order_intake_runtime::IntakeHandler`]:
//!
//! ```text
//! POST /api/v1/orders ──► IdempotencyKey + raw body
//!                         │
//!                         ▼
//!                   IntakeHandler::submit
//!                         │
//!          ┌──────────────┼───────────────┐
//!          ▼              ▼               ▼
//!     202 Accepted   400 Invalid     5xx Transport
//! ```
//!
//! # Example
//!
//! ```ignore
//! use order_intake_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(intake));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use extractors::{IDEMPOTENCY_KEY_HEADER, IdempotencyKey};
pub use routes::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
