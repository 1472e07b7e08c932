//! # Order Intake Core
//!
//! Core types and traits for the idempotent order intake pipeline.
//!
//! The pipeline has a synchronous half that accepts orders and an
//! asynchronous half that processes them. This crate holds everything both
//! halves agree on:
//!
//! - [`order`]: what clients submit and what they get back
//! - [`envelope`]: the JSON payload that crosses the queue
//! - [`transport`]: the queue as seen by publisher and consumer
//! - [`processing`]: the injected publish and processing capabilities
//! - [`environment`]: clock abstraction
//!
//! ## Data Flow
//!
//! ```text
//! client ──► intake ──► OrderPublisher ──► QueueSender
//!                                              │
//!                                              ▼ (broker)
//!            OrderProcessor ◄── consumer ◄── QueueReceiver
//! ```

pub mod envelope;
pub mod environment;
pub mod order;
pub mod processing;
pub mod transport;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use envelope::{EnvelopeError, OrderEnvelope};
pub use order::{AcceptedResponse, CorrelationId, CustomerId, OrderId, OrderRequest, ValidationError};
pub use processing::{OrderProcessor, OrderPublisher, ProcessingFault};
pub use rust_decimal::Decimal;
pub use transport::{
    DeadLetterReason, OutboundMessage, QueueReceiver, QueueSender, ReceivedMessage, TransportError,
};
