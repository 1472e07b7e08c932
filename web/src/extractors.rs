//! Custom Axum extractors.
//!
//! - `IdempotencyKey`: the optional `Idempotency-Key` request header
//!
//! # Examples
//!
//! ```ignore
//! use order_intake_web::extractors::IdempotencyKey;
//!
//! async fn handler(idempotency_key: IdempotencyKey) -> String {
//!     format!("key: {:?}", idempotency_key.as_deref())
//! }
//! ```

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Client-supplied idempotency key.
///
/// `None` when the header is absent or blank; such requests are never
/// deduplicated. A header that is not visible ASCII is rejected with 400.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

impl IdempotencyKey {
    /// The key, if one was supplied.
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let key = value.to_str().map_err(|_| {
            AppError::bad_request(format!("{IDEMPOTENCY_KEY_HEADER} must be visible ASCII"))
        })?;

        let key = key.trim();
        Ok(Self((!key.is_empty()).then(|| key.to_string())))
    }
}
