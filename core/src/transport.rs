//! Queue transport abstraction.
//!
//! The broker behind the queue is a black box that offers at-least-once
//! delivery, a per-message delivery counter, and dead-lettering. This module
//! describes that box as two traits:
//!
//! - [`QueueSender`]: hands an [`OutboundMessage`] to the broker
//! - [`QueueReceiver`]: yields [`ReceivedMessage`]s and settles each one as
//!   completed, dead-lettered, or abandoned for redelivery
//!
//! # Settlement
//!
//! Exactly one settlement call must be made per delivery:
//!
//! ```text
//!            ┌──────────────┐
//!            │   Received   │◄──────────────┐
//!            └──────┬───────┘               │
//!       ┌───────────┼────────────┐          │
//!       ▼           ▼            ▼          │
//! ┌──────────┐ ┌──────────┐ ┌──────────┐    │
//! │ complete │ │dead_letter│ │ abandon  │────┘ delivery_count + 1
//! └──────────┘ └──────────┘ └────┬─────┘
//!                                │ delivery_count >= max
//!                                ▼
//!                     dead-lettered by the transport
//!                     (MaxDeliveryCountExceeded)
//! ```
//!
//! # Dyn Compatibility
//!
//! Both traits return boxed futures so they can be shared as
//! `Arc<dyn QueueSender>` / `Arc<dyn QueueReceiver>`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Application property carrying the customer id.
pub const CUSTOMER_ID_PROPERTY: &str = "customerId";

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors raised by a queue transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker refused the operation.
    #[error("Transport rejected the operation: {0}")]
    Rejected(String),

    /// The broker could not be reached.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish before its deadline.
    #[error("Transport operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The caller cancelled the operation.
    #[error("Transport operation cancelled")]
    Cancelled,

    /// The message could not be encoded for the wire.
    #[error("Failed to encode message: {0}")]
    Encoding(String),

    /// A settlement referred to a delivery the transport no longer holds.
    #[error("Unknown lock token: {0}")]
    UnknownLockToken(String),

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Cancellation and timeouts are never retried: the caller's deadline has
    /// already been spent.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Unavailable(_))
    }
}

/// Why a message was moved to the dead-letter queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The body could not be read as an order envelope.
    DeserializationFailed,
    /// The envelope is missing a required id.
    InvalidPayload,
    /// The transport gave up after too many delivery attempts.
    MaxDeliveryCountExceeded,
}

impl DeadLetterReason {
    /// Stable reason code used in transport metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeserializationFailed => "DeserializationFailed",
            Self::InvalidPayload => "InvalidPayload",
            Self::MaxDeliveryCountExceeded => "MaxDeliveryCountExceeded",
        }
    }

    /// Parses a reason code.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "DeserializationFailed" => Some(Self::DeserializationFailed),
            "InvalidPayload" => Some(Self::InvalidPayload),
            "MaxDeliveryCountExceeded" => Some(Self::MaxDeliveryCountExceeded),
            _ => None,
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message ready to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Broker-side deduplication id
    pub message_id: String,
    /// Correlation id for tracing across the queue
    pub correlation_id: String,
    /// MIME type of `body`
    pub content_type: String,
    /// Application-level attributes readable without decoding the body
    pub application_properties: BTreeMap<String, String>,
    /// Serialized payload
    pub body: Vec<u8>,
}

/// A message delivered to a receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-side deduplication id
    pub message_id: String,
    /// Correlation id, if the sender set one
    pub correlation_id: Option<String>,
    /// MIME type of `body`, if known
    pub content_type: Option<String>,
    /// Application-level attributes
    pub application_properties: BTreeMap<String, String>,
    /// Number of times this message has been delivered, starting at 1
    pub delivery_count: u32,
    /// Opaque handle identifying this delivery for settlement
    pub lock_token: String,
    /// Serialized payload
    pub body: Vec<u8>,
}

impl ReceivedMessage {
    /// Builds the delivery of an outbound message, as an in-process broker would.
    #[must_use]
    pub fn from_outbound(
        message: OutboundMessage,
        delivery_count: u32,
        lock_token: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message.message_id,
            correlation_id: Some(message.correlation_id),
            content_type: Some(message.content_type),
            application_properties: message.application_properties,
            delivery_count,
            lock_token: lock_token.into(),
            body: message.body,
        }
    }
}

/// Sending half of a queue.
pub trait QueueSender: Send + Sync {
    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the broker rejects the message or
    /// cannot be reached.
    fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()>;
}

/// Receiving half of a queue.
///
/// Implementations redeliver abandoned messages with an incremented
/// `delivery_count` and dead-letter them once the configured maximum is
/// reached.
pub trait QueueReceiver: Send + Sync {
    /// Waits for the next delivery.
    ///
    /// Returns `Ok(None)` once the queue is closed and drained.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the broker connection fails.
    fn receive(&self) -> TransportFuture<'_, Option<ReceivedMessage>>;

    /// Acknowledges a delivery; the message will not be redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownLockToken`] if the delivery was
    /// already settled.
    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> TransportFuture<'a, ()>;

    /// Moves a delivery to the dead-letter queue.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the delivery is unknown or the
    /// dead-letter destination cannot be written.
    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: DeadLetterReason,
        description: &'a str,
    ) -> TransportFuture<'a, ()>;

    /// Releases a delivery for redelivery after a processing fault.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the delivery is unknown or cannot be
    /// requeued.
    fn abandon<'a>(&'a self, message: &'a ReceivedMessage, error: &'a str) -> TransportFuture<'a, ()>;
}
