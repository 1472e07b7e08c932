//! The order processor's business step.

use order_intake_core::processing::ProcessingFuture;
use order_intake_core::{OrderEnvelope, OrderProcessor};

/// Records each order in the log and succeeds.
///
/// Stands in for fulfilment. Safe to repeat for the same order id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOrderProcessor;

impl OrderProcessor for LoggingOrderProcessor {
    fn process<'a>(&'a self, order: &'a OrderEnvelope, delivery_count: u32) -> ProcessingFuture<'a> {
        Box::pin(async move {
            tracing::info!(
                order_id = %order.order_id,
                customer_id = %order.customer_id,
                amount = %order.amount,
                correlation_id = %order.correlation_id,
                delivery_count,
                "Processing order"
            );
            Ok(())
        })
    }
}
