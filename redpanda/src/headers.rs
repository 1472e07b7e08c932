//! Mapping between queue message attributes and Kafka record headers.
//!
//! Kafka records have a key, a payload and a list of byte headers. Message
//! attributes travel as UTF-8 headers:
//!
//! | Attribute              | Header                     |
//! |------------------------|----------------------------|
//! | message id             | record key                 |
//! | correlation id         | `correlation-id`           |
//! | content type           | `content-type`             |
//! | delivery count         | `delivery-count`           |
//! | application properties | one header per property    |
//! | dead-letter reason     | `dead-letter-reason`       |
//! | dead-letter detail     | `dead-letter-description`  |

use order_intake_core::{DeadLetterReason, OutboundMessage, ReceivedMessage};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use std::collections::BTreeMap;

/// Correlation id header.
pub const CORRELATION_ID: &str = "correlation-id";
/// Content type header.
pub const CONTENT_TYPE: &str = "content-type";
/// Delivery count header, absent on first delivery.
pub const DELIVERY_COUNT: &str = "delivery-count";
/// Dead-letter reason code header.
pub const DEAD_LETTER_REASON: &str = "dead-letter-reason";
/// Dead-letter description header.
pub const DEAD_LETTER_DESCRIPTION: &str = "dead-letter-description";

const RESERVED: [&str; 5] = [
    CORRELATION_ID,
    CONTENT_TYPE,
    DELIVERY_COUNT,
    DEAD_LETTER_REASON,
    DEAD_LETTER_DESCRIPTION,
];

/// Header list for a record, as owned key/value strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordHeaders(Vec<(String, String)>);

impl RecordHeaders {
    /// Headers for the first send of an outbound message.
    #[must_use]
    pub fn for_outbound(message: &OutboundMessage) -> Self {
        let mut headers = Self::default();
        headers.push(CORRELATION_ID, &message.correlation_id);
        headers.push(CONTENT_TYPE, &message.content_type);
        headers.extend_properties(&message.application_properties);
        headers
    }

    /// Headers for re-producing a delivery with a new delivery count.
    #[must_use]
    pub fn for_redelivery(message: &ReceivedMessage, delivery_count: u32) -> Self {
        let mut headers = Self::carried_over(message);
        headers.push(DELIVERY_COUNT, &delivery_count.to_string());
        headers
    }

    /// Headers for moving a delivery to the dead-letter topic.
    #[must_use]
    pub fn for_dead_letter(
        message: &ReceivedMessage,
        reason: DeadLetterReason,
        description: &str,
    ) -> Self {
        let mut headers = Self::carried_over(message);
        headers.push(DELIVERY_COUNT, &message.delivery_count.to_string());
        headers.push(DEAD_LETTER_REASON, reason.as_str());
        headers.push(DEAD_LETTER_DESCRIPTION, description);
        headers
    }

    fn carried_over(message: &ReceivedMessage) -> Self {
        let mut headers = Self::default();
        if let Some(correlation_id) = &message.correlation_id {
            headers.push(CORRELATION_ID, correlation_id);
        }
        if let Some(content_type) = &message.content_type {
            headers.push(CONTENT_TYPE, content_type);
        }
        headers.extend_properties(&message.application_properties);
        headers
    }

    fn push(&mut self, key: &str, value: &str) {
        self.0.push((key.to_string(), value.to_string()));
    }

    fn extend_properties(&mut self, properties: &BTreeMap<String, String>) {
        for (key, value) in properties {
            if !RESERVED.contains(&key.as_str()) {
                self.push(key, value);
            }
        }
    }

    /// Value of the first header named `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Converts to rdkafka headers.
    #[must_use]
    pub fn to_owned_headers(&self) -> OwnedHeaders {
        self.0
            .iter()
            .fold(OwnedHeaders::new_with_capacity(self.0.len()), |acc, (key, value)| {
                acc.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            })
    }

    /// Reads the UTF-8 headers of a consumed record; others are skipped.
    pub fn from_kafka<H: Headers>(headers: &H) -> Self {
        let mut decoded = Self::default();
        for header in headers.iter() {
            if let Some(value) = header.value.and_then(|v| std::str::from_utf8(v).ok()) {
                decoded.push(header.key, value);
            }
        }
        decoded
    }
}

/// Attributes of a consumed record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedAttributes {
    /// Correlation id, if present
    pub correlation_id: Option<String>,
    /// Content type, if present
    pub content_type: Option<String>,
    /// Delivery count; 1 when the header is absent or unreadable
    pub delivery_count: u32,
    /// Non-reserved headers
    pub application_properties: BTreeMap<String, String>,
}

impl From<&RecordHeaders> for DecodedAttributes {
    fn from(headers: &RecordHeaders) -> Self {
        let application_properties = headers
            .0
            .iter()
            .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            correlation_id: headers.get(CORRELATION_ID).map(str::to_string),
            content_type: headers.get(CONTENT_TYPE).map(str::to_string),
            delivery_count: headers
                .get(DELIVERY_COUNT)
                .and_then(|count| count.parse().ok())
                .filter(|count| *count > 0)
                .unwrap_or(1),
            application_properties,
        }
    }
}
