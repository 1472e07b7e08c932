//! The queue payload shared by publisher and consumer.
//!
//! An [`OrderEnvelope`] is built once, at publish time, from a validated
//! [`OrderRequest`] and never mutated afterwards. On the wire it is a JSON
//! object with PascalCase field names:
//!
//! ```json
//! {
//!   "OrderId": "o1",
//!   "CustomerId": "c1",
//!   "Amount": 10.50,
//!   "CorrelationId": "4f1c...",
//!   "CreatedAtUtc": "2025-01-01T00:00:00Z"
//! }
//! ```
//!
//! `Amount` is written as a JSON number with its exact decimal digits (no
//! float rounding). Numbers and decimal strings are accepted when reading.

use crate::order::{CorrelationId, CustomerId, OrderId, OrderRequest, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type of a serialized envelope.
pub const CONTENT_TYPE: &str = "application/json";

/// Errors from encoding or decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Envelope could not be serialized.
    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    /// Bytes are not a readable envelope.
    #[error("Failed to deserialize envelope: {0}")]
    Deserialization(String),
}

/// Message published for every accepted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderEnvelope {
    /// Client-assigned order id
    #[serde(default, alias = "orderId", alias = "order_id")]
    pub order_id: OrderId,

    /// Customer placing the order
    #[serde(default, alias = "customerId", alias = "customer_id")]
    pub customer_id: CustomerId,

    /// Order amount
    #[serde(default, alias = "amount", with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,

    /// Correlation id of the accepted submission
    #[serde(default, alias = "correlationId", alias = "correlation_id")]
    pub correlation_id: CorrelationId,

    /// When the order was accepted
    #[serde(alias = "createdAtUtc", alias = "created_at_utc")]
    pub created_at_utc: DateTime<Utc>,
}

impl OrderEnvelope {
    /// Builds the envelope for an accepted request.
    #[must_use]
    pub fn new(
        request: OrderRequest,
        correlation_id: CorrelationId,
        created_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: request.order_id,
            customer_id: request.customer_id,
            amount: request.amount,
            correlation_id,
            created_at_utc,
        }
    }

    /// Serializes the envelope to its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Reads an envelope from a message body.
    ///
    /// Only checks the shape; use [`OrderEnvelope::validate`] for the
    /// required ids.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Deserialization`] if the body is not a JSON
    /// envelope.
    pub fn from_json(body: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(body).map_err(|e| EnvelopeError::Deserialization(e.to_string()))
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

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;

    fn envelope() -> OrderEnvelope {
        let created = Utc.timestamp_opt(1_735_689_600, 123_456_789).unwrap();
        OrderEnvelope::new(
            OrderRequest::new("o1", "c1", Decimal::new(1050, 2)),
            CorrelationId::new("corr-1"),
            created,
        )
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let original = envelope();
        let decoded = OrderEnvelope::from_json(&original.to_json().unwrap()).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.created_at_utc.timestamp_subsec_nanos(), 123_456_789);
        assert_eq!(decoded.amount.scale(), 2);
    }

    #[test]
    fn wire_format_uses_pascal_case() {
        let json: serde_json::Value = serde_json::from_slice(&envelope().to_json().unwrap()).unwrap();
        let object = json.as_object().unwrap();

        for field in ["OrderId", "CustomerId", "Amount", "CorrelationId", "CreatedAtUtc"] {
            assert!(object.contains_key(field), "missing {field}");
        }
        assert_eq!(json["CreatedAtUtc"], "2025-01-01T00:00:00.123456789Z");
        assert!(json["Amount"].is_number());
    }

    #[test]
    fn amount_is_a_json_number_with_exact_digits() {
        let body = envelope().to_json().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json["Amount"].is_number(), "Amount serialized as {}", json["Amount"]);
        assert!(String::from_utf8(body).unwrap().contains(r#""Amount":10.50"#));
    }

    #[test]
    fn amount_written_as_string_is_still_readable() {
        let body = br#"{"OrderId":"o1","CustomerId":"c1","Amount":"7.25","CorrelationId":"x","CreatedAtUtc":"2025-01-01T00:00:00Z"}"#;
        assert_eq!(OrderEnvelope::from_json(body).unwrap().amount, Decimal::new(725, 2));
    }

    #[test]
    fn missing_ids_parse_but_fail_validation() {
        let body = br#"{"CustomerId":"c1","Amount":5,"CorrelationId":"x","CreatedAtUtc":"2025-01-01T00:00:00Z"}"#;
        let envelope = OrderEnvelope::from_json(body).unwrap();
        assert_eq!(envelope.validate(), Err(ValidationError::MissingOrderId));
    }

    #[test]
    fn non_json_body_is_unreadable() {
        assert!(matches!(
            OrderEnvelope::from_json(b"<order/>"),
            Err(EnvelopeError::Deserialization(_))
        ));
    }
}
