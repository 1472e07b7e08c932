//! Order domain types.
//!
//! This module defines what a client submits ([`OrderRequest`]), what the
//! intake side hands back ([`AcceptedResponse`]), and the identifiers that
//! travel with an order across the synchronous/asynchronous boundary.
//!
//! # Validation
//!
//! An order is valid when it parses as JSON of the expected shape and both
//! `OrderId` and `CustomerId` are non-blank. The amount is carried as a
//! fixed-point [`Decimal`] and is not range-checked here.
//!
//! ```
//! use order_intake_core::order::{OrderRequest, ValidationError};
//!
//! let order = OrderRequest::from_json(br#"{"OrderId":"o1","CustomerId":"c1","Amount":10}"#)
//!     .expect("valid order");
//! assert_eq!(order.order_id.as_str(), "o1");
//!
//! let err = OrderRequest::from_json(br#"{"OrderId":"","CustomerId":"c1","Amount":10}"#)
//!     .unwrap_err();
//! assert_eq!(err, ValidationError::MissingOrderId);
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Reasons an order payload is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Body is not JSON of the expected shape.
    #[error("Malformed order payload: {0}")]
    Malformed(String),

    /// `OrderId` is missing or blank.
    #[error("OrderId is missing")]
    MissingOrderId,

    /// `CustomerId` is missing or blank.
    #[error("CustomerId is missing")]
    MissingCustomerId,
}

/// Client-assigned order identifier.
///
/// Doubles as the transport-level deduplication id when the order is published.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates a new `OrderId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Customer identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Creates a new `CustomerId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-generated token identifying one accepted submission.
///
/// Travels as the transport correlation id so a request can be traced across
/// the queue. Generated values are random UUID v4 strings; values read back
/// from the wire are kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing correlation id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An order creation request as submitted by a client.
///
/// Field names are PascalCase on the wire; camelCase and `snake_case`
/// spellings are accepted as well. Missing string fields deserialize as
/// empty and are then rejected by validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRequest {
    /// Client-assigned order id
    #[serde(default, alias = "orderId", alias = "order_id")]
    pub order_id: OrderId,

    /// Customer placing the order
    #[serde(default, alias = "customerId", alias = "customer_id")]
    pub customer_id: CustomerId,

    /// Order amount
    #[serde(default, alias = "amount", with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
}

impl OrderRequest {
    /// Creates a request from its parts.
    #[must_use]
    pub fn new(order_id: impl Into<String>, customer_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            order_id: OrderId::new(order_id),
            customer_id: CustomerId::new(customer_id),
            amount,
        }
    }

    /// Parses and validates a request body.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Malformed`] if the body is not a JSON object
    /// of the expected shape, or the `Missing*` variants when a required id
    /// is blank.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Checks that both ids are present.
    ///
    /// # Errors
    ///
    /// Returns the first missing id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.is_blank() {
            return Err(ValidationError::MissingOrderId);
        }
        if self.customer_id.is_blank() {
            return Err(ValidationError::MissingCustomerId);
        }
        Ok(())
    }
}

/// Body returned for an accepted order.
///
/// Serialized camelCase (`message`, `correlationId`) for HTTP clients. A
/// response is immutable once built; idempotent replays return the stored
/// value unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    /// Human-readable status message
    pub message: String,

    /// Correlation id assigned to this submission
    pub correlation_id: CorrelationId,
}

impl AcceptedResponse {
    /// Message used for every accepted order.
    pub const MESSAGE: &'static str = "Order accepted";

    /// Creates the accepted response for a correlation id.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            message: Self::MESSAGE.to_string(),
            correlation_id,
        }
    }
}
