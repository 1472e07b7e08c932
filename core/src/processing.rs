//! Capabilities injected into the intake and consumer sides.
//!
//! - [`OrderPublisher`]: puts an accepted envelope on the queue
//! - [`OrderProcessor`]: the business step run for each consumed order
//!
//! Both are trait objects so tests can substitute recording doubles for a
//! live broker or downstream service.

use crate::envelope::OrderEnvelope;
use crate::transport::TransportFuture;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`OrderProcessor::process`].
pub type ProcessingFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProcessingFault>> + Send + 'a>>;

/// A failure in the processing step that redelivery may fix.
///
/// A fault leaves the message unacknowledged so the transport's retry policy
/// applies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingFault {
    /// A downstream dependency failed.
    #[error("Transient processing failure: {0}")]
    Transient(String),

    /// Failure injected for the configured sentinel customer.
    #[error("Simulated processing failure for order {order_id}")]
    Simulated {
        /// Order that hit the simulation
        order_id: String,
    },
}

/// Publishes accepted orders.
pub trait OrderPublisher: Send + Sync {
    /// Publishes one envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`](crate::transport::TransportError) when the
    /// queue rejects or cannot accept the message.
    fn publish<'a>(&'a self, envelope: &'a OrderEnvelope) -> TransportFuture<'a, ()>;
}

/// Business processing for a consumed order.
///
/// Delivery is at-least-once, so an implementation may see the same
/// `order_id` more than once and must be safe to run repeatedly for it.
pub trait OrderProcessor: Send + Sync {
    /// Processes an order.
    ///
    /// `delivery_count` starts at 1 and grows with each redelivery.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessingFault`] to request redelivery.
    fn process<'a>(&'a self, order: &'a OrderEnvelope, delivery_count: u32) -> ProcessingFuture<'a>;
}
