//! Redpanda queue transport for the order intake pipeline.
//!
//! [`RedpandaOrderQueue`] implements [`QueueSender`] and [`QueueReceiver`] over
//! a Kafka-compatible broker using rdkafka. Works against Redpanda, Apache
//! Kafka, or any service that speaks the Kafka protocol.
//!
//! # Queue Semantics on a Log
//!
//! Kafka has no per-message acknowledgement, lock or delivery counter, so the
//! queue operations are built from records and offsets:
//!
//! ```text
//!                       orders topic
//!   send ──────────► [ r0 | r1 | r2 | ... ] ──────► receive
//!   (key = OrderId)                                  │
//!          ┌────────────────────────┬────────────────┼──────────────┐
//!          ▼                        ▼                ▼              │
//!      complete               dead_letter         abandon           │
//!      commit offset     produce to DLQ topic   re-produce with     │
//!                        then commit            delivery-count + 1 ─┘
//!                                               then commit
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits. An offset is committed only
//! after the delivery is settled and every earlier offset on its partition is
//! settled too, so a crash redelivers rather than drops. The record key is the
//! message id, so all deliveries of one order land on the same partition.
//!
//! If the produce behind `dead_letter` or `abandon` fails, the delivery is
//! released: its partition is rewound to the record's offset, and the record
//! comes back through `receive`. Later offsets on that partition can be
//! delivered a second time.
//!
//! # Example
//!
//! ```no_run
//! use order_intake_redpanda::RedpandaOrderQueue;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaOrderQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("orders")
//!     .dead_letter_topic("orders.dlq")
//!     .consumer_group("order-processor")
//!     .max_delivery_count(10)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod headers;
pub mod offsets;

use crate::headers::{DecodedAttributes, RecordHeaders};
use crate::offsets::OffsetTracker;
use order_intake_core::transport::TransportFuture;
use order_intake_core::{
    DeadLetterReason, OutboundMessage, QueueReceiver, QueueSender, ReceivedMessage, TransportError,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Default queue topic.
pub const DEFAULT_TOPIC: &str = "orders";
/// Default dead-letter topic.
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "orders.dlq";
/// Default number of deliveries before the transport dead-letters a message.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

/// Errors building a [`RedpandaOrderQueue`].
#[derive(Error, Debug)]
pub enum RedpandaError {
    /// Required setting missing
    #[error("Redpanda configuration error: {0}")]
    Config(String),

    /// rdkafka client could not be created
    #[error("Failed to create Kafka client: {0}")]
    ConnectionFailed(String),
}

/// Maps rdkafka errors onto transport errors.
fn transport_error(error: &KafkaError, timeout: Duration) -> TransportError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            TransportError::TimedOut(timeout)
        }
        Some(
            RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::InvalidMessage,
        ) => TransportError::Rejected(error.to_string()),
        _ => TransportError::Unavailable(error.to_string()),
    }
}

fn lock_token(partition: i32, offset: i64) -> String {
    format!("{partition}:{offset}")
}

fn parse_lock_token(token: &str) -> Result<(i32, i64), TransportError> {
    token
        .split_once(':')
        .and_then(|(partition, offset)| Some((partition.parse().ok()?, offset.parse().ok()?)))
        .ok_or_else(|| TransportError::UnknownLockToken(token.to_string()))
}

/// Kafka-backed order queue.
///
/// The producer is always created; the consumer only when a consumer group
/// is configured, so the intake side can use a send-only instance.
pub struct RedpandaOrderQueue {
    producer: FutureProducer,
    consumer: Option<StreamConsumer>,
    topic: String,
    dead_letter_topic: String,
    timeout: Duration,
    max_delivery_count: u32,
    offsets: Mutex<OffsetTracker>,
}

impl RedpandaOrderQueue {
    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaOrderQueueBuilder {
        RedpandaOrderQueueBuilder::default()
    }

    /// Queue topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Dead-letter topic.
    #[must_use]
    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    fn offsets(&self) -> MutexGuard<'_, OffsetTracker> {
        self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn produce(
        &self,
        topic: &str,
        key: &str,
        body: &[u8],
        headers: &RecordHeaders,
    ) -> Result<(), TransportError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(body)
            .headers(headers.to_owned_headers());

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    partition,
                    offset,
                    "Record produced"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %topic, key = %key, error = %kafka_error, "Failed to produce record");
                Err(transport_error(&kafka_error, self.timeout))
            }
        }
    }

    fn to_received(&self, message: &BorrowedMessage<'_>) -> ReceivedMessage {
        let headers = message
            .headers()
            .map(RecordHeaders::from_kafka)
            .unwrap_or_default();
        let attributes = DecodedAttributes::from(&headers);

        self.offsets().track(message.partition(), message.offset());

        ReceivedMessage {
            message_id: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned())
                .unwrap_or_default(),
            correlation_id: attributes.correlation_id,
            content_type: attributes.content_type,
            application_properties: attributes.application_properties,
            delivery_count: attributes.delivery_count,
            lock_token: lock_token(message.partition(), message.offset()),
            body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    /// Ensures `message` is still held before producing anything for it.
    fn check_in_flight(&self, message: &ReceivedMessage) -> Result<(i32, i64), TransportError> {
        let (partition, offset) = parse_lock_token(&message.lock_token)?;
        if self.offsets().is_in_flight(partition, offset) {
            Ok((partition, offset))
        } else {
            Err(TransportError::UnknownLockToken(message.lock_token.clone()))
        }
    }

    /// Settles a delivery and commits whatever became safe to commit.
    fn settle(&self, partition: i32, offset: i64) -> Result<(), TransportError> {
        let position = self
            .offsets()
            .settle(partition, offset)
            .map_err(|()| TransportError::UnknownLockToken(lock_token(partition, offset)))?;

        let (Some(position), Some(consumer)) = (position, &self.consumer) else {
            return Ok(());
        };

        let mut commit = TopicPartitionList::new();
        commit
            .add_partition_offset(&self.topic, partition, Offset::Offset(position))
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        if let Err(e) = consumer.commit(&commit, CommitMode::Async) {
            tracing::warn!(
                partition,
                offset = position,
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
        Ok(())
    }

    /// Gives up on a delivery whose settlement failed and rewinds its
    /// partition so the record is received again.
    fn release(&self, partition: i32, offset: i64) {
        if !self.offsets().release(partition, offset) {
            return;
        }
        let Some(consumer) = &self.consumer else {
            return;
        };

        match consumer.seek(&self.topic, partition, Offset::Offset(offset), self.timeout) {
            Ok(()) => tracing::warn!(partition, offset, "Settlement failed, partition rewound for redelivery"),
            Err(e) => tracing::error!(
                partition,
                offset,
                error = %e,
                "Failed to rewind partition (record is redelivered after a restart or rebalance)"
            ),
        }
    }

    /// Produces the record that settles a delivery, releasing the delivery
    /// if the produce fails.
    async fn produce_or_release(
        &self,
        (partition, offset): (i32, i64),
        topic: &str,
        message: &ReceivedMessage,
        headers: &RecordHeaders,
    ) -> Result<(), TransportError> {
        let produced = self
            .produce(topic, &message.message_id, &message.body, headers)
            .await;
        if produced.is_err() {
            self.release(partition, offset);
        }
        produced
    }
}

impl QueueSender for RedpandaOrderQueue {
    fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let headers = RecordHeaders::for_outbound(&message);
            self.produce(&self.topic, &message.message_id, &message.body, &headers)
                .await
        })
    }
}

impl QueueReceiver for RedpandaOrderQueue {
    fn receive(&self) -> TransportFuture<'_, Option<ReceivedMessage>> {
        Box::pin(async move {
            let Some(consumer) = &self.consumer else {
                tracing::warn!("Queue has no consumer group configured; nothing to receive");
                return Ok(None);
            };

            match consumer.recv().await {
                Ok(message) => {
                    let received = self.to_received(&message);
                    tracing::trace!(
                        message_id = %received.message_id,
                        lock_token = %received.lock_token,
                        delivery_count = received.delivery_count,
                        "Received record"
                    );
                    Ok(Some(received))
                }
                Err(e) => Err(transport_error(&e, self.timeout)),
            }
        })
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let (partition, offset) = parse_lock_token(&message.lock_token)?;
            self.settle(partition, offset)
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: DeadLetterReason,
        description: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let (partition, offset) = self.check_in_flight(message)?;
            let headers = RecordHeaders::for_dead_letter(message, reason, description);
            self.produce_or_release((partition, offset), &self.dead_letter_topic, message, &headers)
                .await?;
            tracing::warn!(
                message_id = %message.message_id,
                reason = %reason,
                dead_letter_topic = %self.dead_letter_topic,
                "Record moved to dead-letter topic"
            );
            self.settle(partition, offset)
        })
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage, error: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if message.delivery_count >= self.max_delivery_count {
                tracing::warn!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Max delivery count reached, dead-lettering"
                );
                return self
                    .dead_letter(message, DeadLetterReason::MaxDeliveryCountExceeded, error)
                    .await;
            }

            let (partition, offset) = self.check_in_flight(message)?;
            let headers = RecordHeaders::for_redelivery(message, message.delivery_count + 1);
            self.produce_or_release((partition, offset), &self.topic, message, &headers)
                .await?;
            self.settle(partition, offset)
        })
    }
}

/// Builder for configuring a [`RedpandaOrderQueue`].
#[derive(Default)]
pub struct RedpandaOrderQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    dead_letter_topic: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    max_delivery_count: Option<u32>,
    auto_offset_reset: Option<String>,
}

impl RedpandaOrderQueueBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the queue topic. Default: `orders`.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the dead-letter topic. Default: `orders.dlq`.
    #[must_use]
    pub fn dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    /// Set the consumer group. Without one the queue is send-only.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// `"0"`, `"1"` or `"all"`. Default: `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the delivery attempt limit. Default: 10; values below 1 are treated as 1.
    #[must_use]
    pub const fn max_delivery_count(mut self, max: u32) -> Self {
        self.max_delivery_count = Some(max);
        self
    }

    /// Set where a new consumer group starts reading. Default: `"earliest"`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaOrderQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`RedpandaError::Config`] if brokers are not set and
    /// [`RedpandaError::ConnectionFailed`] if a client cannot be created or
    /// subscribed.
    pub fn build(self) -> Result<RedpandaOrderQueue, RedpandaError> {
        let brokers = self
            .brokers
            .ok_or_else(|| RedpandaError::Config("Brokers not configured".to_string()))?;
        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let dead_letter_topic = self
            .dead_letter_topic
            .unwrap_or_else(|| DEFAULT_DEAD_LETTER_TOPIC.to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| RedpandaError::ConnectionFailed(format!("producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let consumer = match &self.consumer_group {
            Some(group) => {
                let consumer: StreamConsumer = ClientConfig::new()
                    .set("bootstrap.servers", &brokers)
                    .set("group.id", group)
                    .set("enable.auto.commit", "false")
                    .set("auto.offset.reset", &auto_offset_reset)
                    .set("session.timeout.ms", "6000")
                    .set("enable.partition.eof", "false")
                    .create()
                    .map_err(|e| RedpandaError::ConnectionFailed(format!("consumer: {e}")))?;
                consumer
                    .subscribe(&[topic.as_str()])
                    .map_err(|e| RedpandaError::ConnectionFailed(format!("subscribe: {e}")))?;
                Some(consumer)
            }
            None => None,
        };

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            dead_letter_topic = %dead_letter_topic,
            consumer_group = self.consumer_group.as_deref().unwrap_or("-"),
            acks = %acks,
            "RedpandaOrderQueue created"
        );

        Ok(RedpandaOrderQueue {
            producer,
            consumer,
            topic,
            dead_letter_topic,
            timeout,
            max_delivery_count: self
                .max_delivery_count
                .unwrap_or(DEFAULT_MAX_DELIVERY_COUNT)
                .max(1),
            offsets: Mutex::new(OffsetTracker::default()),
        })
    }
}
