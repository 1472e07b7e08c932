//! Per-message consumer logic.
//!
//! [`OrderConsumer::handle`] decides what should happen to one delivery and
//! returns it as a [`Settlement`]; the [`Dispatcher`](crate::dispatcher::Dispatcher)
//! applies that decision to the transport. Keeping the decision pure makes it
//! testable without a broker.

use crate::metrics::ConsumerMetrics;
use order_intake_core::{
    CustomerId, DeadLetterReason, OrderEnvelope, OrderId, OrderProcessor, ProcessingFault,
    ReceivedMessage,
};
use std::sync::Arc;

/// Default sentinel customer for failure simulation.
pub const DEFAULT_SIMULATED_FAILURE_CUSTOMER: &str = "FAIL";

/// Terminal outcome for a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Processing succeeded; acknowledge the message.
    Complete {
        /// Processed order
        order_id: OrderId,
    },
    /// The message can never succeed; move it to the dead-letter queue.
    DeadLetter {
        /// Reason code
        reason: DeadLetterReason,
        /// Error detail
        description: String,
    },
}

/// Injects a processing fault for one customer id.
///
/// Used to exercise redelivery and dead-lettering end to end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureSimulation {
    /// Customer whose orders always fault
    pub customer_id: CustomerId,
}

impl Default for FailureSimulation {
    fn default() -> Self {
        Self {
            customer_id: CustomerId::new(DEFAULT_SIMULATED_FAILURE_CUSTOMER),
        }
    }
}

/// Decodes, validates and processes consumed orders.
pub struct OrderConsumer {
    processor: Arc<dyn OrderProcessor>,
    simulation: Option<FailureSimulation>,
}

impl OrderConsumer {
    /// Creates a consumer. `simulation` of `None` disables failure injection.
    #[must_use]
    pub fn new(processor: Arc<dyn OrderProcessor>, simulation: Option<FailureSimulation>) -> Self {
        Self {
            processor,
            simulation,
        }
    }

    /// Decides the settlement for one delivery.
    ///
    /// Unreadable and invalid messages become dead-letter settlements and
    /// never fault.
    ///
    /// # Errors
    ///
    /// Returns the [`ProcessingFault`] when processing should be retried by
    /// redelivery.
    pub async fn handle(&self, message: &ReceivedMessage) -> Result<Settlement, ProcessingFault> {
        let envelope = match OrderEnvelope::from_json(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Failed to deserialize order message"
                );
                return Ok(Self::dead_letter(
                    DeadLetterReason::DeserializationFailed,
                    e.to_string(),
                ));
            }
        };

        if let Err(e) = envelope.validate() {
            tracing::error!(
                message_id = %message.message_id,
                correlation_id = %envelope.correlation_id,
                error = %e,
                "Order message failed validation"
            );
            return Ok(Self::dead_letter(DeadLetterReason::InvalidPayload, e.to_string()));
        }

        tracing::info!(
            order_id = %envelope.order_id,
            customer_id = %envelope.customer_id,
            correlation_id = %envelope.correlation_id,
            delivery_count = message.delivery_count,
            "Processing order"
        );

        if let Some(simulation) = &self.simulation {
            if envelope.customer_id == simulation.customer_id {
                tracing::warn!(
                    order_id = %envelope.order_id,
                    delivery_count = message.delivery_count,
                    "Simulating processing failure"
                );
                ConsumerMetrics::record_fault();
                return Err(ProcessingFault::Simulated {
                    order_id: envelope.order_id.to_string(),
                });
            }
        }

        if let Err(fault) = self.processor.process(&envelope, message.delivery_count).await {
            tracing::warn!(
                order_id = %envelope.order_id,
                delivery_count = message.delivery_count,
                error = %fault,
                "Order processing failed, leaving message for redelivery"
            );
            ConsumerMetrics::record_fault();
            return Err(fault);
        }

        tracing::info!(
            order_id = %envelope.order_id,
            correlation_id = %envelope.correlation_id,
            "Order processed"
        );
        Ok(Settlement::Complete {
            order_id: envelope.order_id,
        })
    }

    fn dead_letter(reason: DeadLetterReason, description: String) -> Settlement {
        Settlement::DeadLetter {
            reason,
            description,
        }
    }
}
