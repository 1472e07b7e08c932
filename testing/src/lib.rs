//! # Order Intake Testing
//!
//! Test doubles for the order intake pipeline.
//!
//! This crate provides:
//! - [`InMemoryQueue`]: a queue with lock tokens, delivery counts and a
//!   dead-letter sub-queue, for running the whole pipeline in one process
//! - [`RecordingPublisher`] and [`RecordingProcessor`]: capture calls and
//!   inject failures
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use order_intake_testing::{test_clock, helpers};
//! use order_intake_core::environment::Clock;
//!
//! let envelope = helpers::envelope("ORD-1", "CUST-1", test_clock().now());
//! assert_eq!(envelope.order_id.as_str(), "ORD-1");
//! ```

use chrono::{DateTime, Utc};
use order_intake_core::environment::Clock;

pub mod in_memory_queue;
pub mod recorders;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making envelope timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_intake_testing::mocks::FixedClock;
    /// use order_intake_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test data.
pub mod helpers {
    use super::{DateTime, Utc};
    use order_intake_core::{CorrelationId, Decimal, OrderEnvelope, OrderRequest};
    use order_intake_core::transport::{OutboundMessage, CUSTOMER_ID_PROPERTY};
    use std::collections::BTreeMap;

    /// A valid request with a fixed amount of `42.50`.
    #[must_use]
    pub fn request(order_id: &str, customer_id: &str) -> OrderRequest {
        OrderRequest::new(order_id, customer_id, Decimal::new(4250, 2))
    }

    /// JSON body for [`request`], in the PascalCase client format.
    #[must_use]
    pub fn request_body(order_id: &str, customer_id: &str) -> Vec<u8> {
        format!(r#"{{"OrderId":"{order_id}","CustomerId":"{customer_id}","Amount":42.50}}"#)
            .into_bytes()
    }

    /// An envelope for [`request`] with a generated correlation id.
    #[must_use]
    pub fn envelope(order_id: &str, customer_id: &str, created_at: DateTime<Utc>) -> OrderEnvelope {
        OrderEnvelope::new(request(order_id, customer_id), CorrelationId::generate(), created_at)
    }

    /// An outbound message carrying an arbitrary body, keyed by `message_id`.
    #[must_use]
    pub fn raw_message(message_id: &str, body: &[u8]) -> OutboundMessage {
        OutboundMessage {
            message_id: message_id.to_string(),
            correlation_id: format!("corr-{message_id}"),
            content_type: order_intake_core::envelope::CONTENT_TYPE.to_string(),
            application_properties: BTreeMap::new(),
            body: body.to_vec(),
        }
    }

    /// An outbound message carrying `envelope`, shaped like the queue publisher's output.
    ///
    /// # Panics
    ///
    /// Panics if the envelope cannot be serialized.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn envelope_message(envelope: &OrderEnvelope) -> OutboundMessage {
        let mut application_properties = BTreeMap::new();
        application_properties.insert(
            CUSTOMER_ID_PROPERTY.to_string(),
            envelope.customer_id.to_string(),
        );
        OutboundMessage {
            message_id: envelope.order_id.to_string(),
            correlation_id: envelope.correlation_id.to_string(),
            content_type: order_intake_core::envelope::CONTENT_TYPE.to_string(),
            application_properties,
            body: envelope.to_json().expect("envelope serializes"),
        }
    }
}

// Re-export commonly used items
pub use in_memory_queue::{DeadLetteredMessage, InMemoryQueue, InMemoryQueueBuilder};
pub use mocks::{FixedClock, test_clock};
pub use recorders::{RecordingProcessor, RecordingPublisher};
