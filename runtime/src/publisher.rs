//! [`OrderPublisher`] over a [`QueueSender`].

use order_intake_core::envelope::CONTENT_TYPE;
use order_intake_core::transport::{CUSTOMER_ID_PROPERTY, TransportFuture};
use order_intake_core::{OrderEnvelope, OrderPublisher, OutboundMessage, QueueSender, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Publishes envelopes as queue messages.
///
/// The message id is the `OrderId`, so a broker with duplicate detection
/// drops a second publish of the same order. The correlation id and
/// `customerId` property let operators trace and filter messages without
/// reading the body.
#[derive(Clone)]
pub struct QueueOrderPublisher {
    sender: Arc<dyn QueueSender>,
}

impl QueueOrderPublisher {
    /// Creates a publisher over `sender`.
    #[must_use]
    pub fn new(sender: Arc<dyn QueueSender>) -> Self {
        Self { sender }
    }

    /// Builds the queue message for an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encoding`] if the envelope cannot be
    /// serialized.
    pub fn to_message(envelope: &OrderEnvelope) -> Result<OutboundMessage, TransportError> {
        let body = envelope
            .to_json()
            .map_err(|e| TransportError::Encoding(e.to_string()))?;

        let mut application_properties = BTreeMap::new();
        application_properties.insert(
            CUSTOMER_ID_PROPERTY.to_string(),
            envelope.customer_id.to_string(),
        );

        Ok(OutboundMessage {
            message_id: envelope.order_id.to_string(),
            correlation_id: envelope.correlation_id.to_string(),
            content_type: CONTENT_TYPE.to_string(),
            application_properties,
            body,
        })
    }
}

impl OrderPublisher for QueueOrderPublisher {
    fn publish<'a>(&'a self, envelope: &'a OrderEnvelope) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let message = Self::to_message(envelope)?;
            self.sender.send(message).await?;

            tracing::debug!(
                order_id = %envelope.order_id,
                correlation_id = %envelope.correlation_id,
                "Envelope sent to queue"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use order_intake_core::QueueReceiver;
    use order_intake_core::environment::Clock;
    use order_intake_testing::{InMemoryQueue, helpers, test_clock};

    #[tokio::test]
    async fn publishes_message_with_order_attributes() {
        let queue = Arc::new(InMemoryQueue::new());
        let sender: Arc<dyn QueueSender> = queue.clone();
        let publisher = QueueOrderPublisher::new(sender);
        let envelope = helpers::envelope("ORD-9", "CUST-3", test_clock().now());

        publisher.publish(&envelope).await.unwrap();

        let received = queue.try_receive().unwrap();
        assert_eq!(received.message_id, "ORD-9");
        assert_eq!(received.correlation_id.as_deref(), Some(envelope.correlation_id.as_str()));
        assert_eq!(received.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            received.application_properties.get("customerId").map(String::as_str),
            Some("CUST-3")
        );
        assert_eq!(OrderEnvelope::from_json(&received.body).unwrap(), envelope);
        queue.complete(&received).await.unwrap();
    }

    #[tokio::test]
    async fn surfaces_transport_errors() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.close();
        let publisher = QueueOrderPublisher::new(queue);
        let envelope = helpers::envelope("ORD-1", "CUST-1", test_clock().now());

        assert_eq!(publisher.publish(&envelope).await, Err(TransportError::Closed));
    }
}
