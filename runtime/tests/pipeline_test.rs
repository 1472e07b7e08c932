//! End-to-end tests: intake → in-memory queue → dispatcher → processor.
//!
//! These run both halves of the pipeline in one process with the same code the
//! binaries use, swapping only the broker for `InMemoryQueue`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::future::join_all;
use order_intake_core::transport::TransportFuture;
use order_intake_core::{DeadLetterReason, OrderEnvelope, OutboundMessage, QueueReceiver, QueueSender};
use order_intake_runtime::{
    DispatchSummary, Dispatcher, FailureSimulation, IdempotencyCache, IntakeConfig, IntakeError,
    IntakeHandler, OrderConsumer, Outcome, QueueOrderPublisher,
};
use order_intake_testing::{InMemoryQueue, RecordingProcessor, RecordingPublisher, helpers, test_clock};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    queue: Arc<InMemoryQueue>,
    intake: Arc<IntakeHandler>,
    processor: Arc<RecordingProcessor>,
    dispatcher: Dispatcher,
}

fn pipeline(queue: InMemoryQueue, simulation: Option<FailureSimulation>) -> Pipeline {
    let queue = Arc::new(queue);
    let sender: Arc<dyn QueueSender> = queue.clone();
    let receiver: Arc<dyn QueueReceiver> = queue.clone();
    let processor = Arc::new(RecordingProcessor::new());

    let intake = Arc::new(IntakeHandler::new(
        Arc::new(IdempotencyCache::new()),
        Arc::new(QueueOrderPublisher::new(sender)),
        Arc::new(test_clock()),
        IntakeConfig::default(),
    ));
    let consumer = Arc::new(OrderConsumer::new(processor.clone(), simulation));
    let dispatcher = Dispatcher::new(receiver, consumer, 4);

    Pipeline {
        queue,
        intake,
        processor,
        dispatcher,
    }
}

async fn drain(pipeline: &Pipeline) -> DispatchSummary {
    pipeline.queue.close();
    pipeline.dispatcher.run(CancellationToken::new()).await
}

#[tokio::test]
async fn accepted_order_is_processed_and_completed() {
    let pipeline = pipeline(InMemoryQueue::new(), None);

    let response = pipeline
        .intake
        .submit(None, &helpers::request_body("ORD-1", "CUST-1"), &CancellationToken::new())
        .await
        .unwrap();
    let summary = drain(&pipeline).await;

    assert_eq!(summary.completed, 1);
    let completed = pipeline.queue.completed();
    let envelope = OrderEnvelope::from_json(&completed[0].body).unwrap();
    assert_eq!(envelope.correlation_id, response.correlation_id);
    assert_eq!(completed[0].correlation_id.as_deref(), Some(response.correlation_id.as_str()));
    assert_eq!(pipeline.processor.processed_order_ids(), vec!["ORD-1".to_string()]);
}

#[tokio::test]
async fn concurrent_requests_with_one_key_publish_once() {
    let publisher = Arc::new(RecordingPublisher::with_delay(Duration::from_millis(20)));
    let intake = Arc::new(IntakeHandler::new(
        Arc::new(IdempotencyCache::new()),
        publisher.clone(),
        Arc::new(test_clock()),
        IntakeConfig::default(),
    ));

    let requests = (0..25).map(|i| {
        let intake = Arc::clone(&intake);
        tokio::spawn(async move {
            let body = helpers::request_body(&format!("ORD-{i}"), "CUST-1");
            intake
                .submit(Some("same-key"), &body, &CancellationToken::new())
                .await
        })
    });
    let responses: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(publisher.published_count(), 1);
    assert!(responses.iter().all(|r| *r == responses[0]));
    assert_eq!(
        publisher.published()[0].correlation_id,
        responses[0].correlation_id
    );
}

#[tokio::test]
async fn requests_without_key_always_publish() {
    let pipeline = pipeline(InMemoryQueue::new(), None);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        pipeline
            .intake
            .submit(None, &helpers::request_body("ORD-1", "CUST-1"), &cancel)
            .await
            .unwrap();
    }

    assert_eq!(pipeline.queue.pending_len(), 3);
    assert!(pipeline.intake.cache().is_empty());
}

#[tokio::test]
async fn broker_duplicate_detection_collapses_resubmitted_orders() {
    let pipeline = pipeline(InMemoryQueue::builder().duplicate_detection(true).build(), None);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        pipeline
            .intake
            .submit(None, &helpers::request_body("ORD-1", "CUST-1"), &cancel)
            .await
            .unwrap();
    }
    let summary = drain(&pipeline).await;

    assert_eq!(pipeline.queue.sent_count(), 3);
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn invalid_payload_is_rejected_without_publish() {
    let pipeline = pipeline(InMemoryQueue::new(), None);
    let cancel = CancellationToken::new();

    let rejected = pipeline
        .intake
        .submit(None, br#"{"OrderId":"","CustomerId":"c1","Amount":10}"#, &cancel)
        .await;
    let accepted = pipeline
        .intake
        .submit(None, br#"{"OrderId":"o1","CustomerId":"c1","Amount":10}"#, &cancel)
        .await;

    assert!(matches!(rejected, Err(IntakeError::InvalidPayload(_))));
    assert!(accepted.is_ok());
    assert_eq!(pipeline.queue.sent_count(), 1);
}

#[tokio::test]
async fn unreadable_message_is_dead_lettered_without_redelivery() {
    let pipeline = pipeline(InMemoryQueue::new(), None);
    pipeline
        .queue
        .send(helpers::raw_message("garbage", b"this is not json"))
        .await
        .unwrap();

    let summary = drain(&pipeline).await;

    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(summary.abandoned, 0);
    assert!(pipeline.queue.completed().is_empty());
    let dead = pipeline.queue.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::DeserializationFailed);
    assert_eq!(dead[0].message.delivery_count, 1);
    assert!(!dead[0].description.is_empty());
}

#[tokio::test]
async fn simulated_failure_is_redelivered_then_dead_lettered_by_transport() {
    let pipeline = pipeline(
        InMemoryQueue::builder().max_delivery_count(3).build(),
        Some(FailureSimulation::default()),
    );
    pipeline
        .intake
        .submit(None, &helpers::request_body("ORD-F", "FAIL"), &CancellationToken::new())
        .await
        .unwrap();

    for expected_count in 1..=2 {
        let delivery = pipeline.queue.try_receive().unwrap();
        assert_eq!(delivery.delivery_count, expected_count);
        assert_eq!(
            pipeline.dispatcher.dispatch_one(delivery).await,
            Ok(Outcome::Abandoned)
        );
    }

    let last = pipeline.queue.try_receive().unwrap();
    assert_eq!(last.delivery_count, 3);
    assert_eq!(pipeline.dispatcher.dispatch_one(last).await, Ok(Outcome::Abandoned));

    assert!(pipeline.queue.try_receive().is_none());
    assert!(pipeline.queue.completed().is_empty());
    let dead = pipeline.queue.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliveryCountExceeded);
    assert!(pipeline.processor.calls().is_empty());
}

#[tokio::test]
async fn transient_processing_fault_succeeds_on_redelivery() {
    let pipeline = pipeline(InMemoryQueue::new(), None);
    pipeline.processor.fail_times("ORD-1", 2);
    pipeline
        .intake
        .submit(None, &helpers::request_body("ORD-1", "CUST-1"), &CancellationToken::new())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let run = {
        let dispatcher = pipeline.dispatcher.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(shutdown).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.queue.completed().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("order completes after redelivery");
    shutdown.cancel();
    let summary = run.await.unwrap();

    assert_eq!(summary.abandoned, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(pipeline.queue.completed()[0].delivery_count, 3);
}

/// Hands each message to the queue, then holds the acknowledgement back.
struct SlowAckSender {
    queue: Arc<InMemoryQueue>,
    ack_delay: Duration,
}

impl QueueSender for SlowAckSender {
    fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.queue.send(message).await?;
            tokio::time::sleep(self.ack_delay).await;
            Ok(())
        })
    }
}

#[tokio::test]
async fn republish_after_dropped_request_is_collapsed_by_broker_duplicate_detection() {
    let queue = Arc::new(InMemoryQueue::builder().duplicate_detection(true).build());
    let sender = SlowAckSender {
        queue: queue.clone(),
        ack_delay: Duration::from_millis(200),
    };
    let intake = IntakeHandler::new(
        Arc::new(IdempotencyCache::new()),
        Arc::new(QueueOrderPublisher::new(Arc::new(sender))),
        Arc::new(test_clock()),
        IntakeConfig::default(),
    );
    let cancel = CancellationToken::new();
    let body = helpers::request_body("ORD-1", "CUST-1");

    // The record reaches the queue but the request is dropped before the ack
    let dropped =
        tokio::time::timeout(Duration::from_millis(20), intake.submit(Some("key-1"), &body, &cancel)).await;
    assert!(dropped.is_err());

    let replayed = intake.submit(Some("key-1"), &body, &cancel).await.unwrap();

    assert_eq!(queue.sent_count(), 2);
    assert_eq!(queue.pending_len(), 1);
    let delivery = queue.try_receive().unwrap();
    assert_eq!(delivery.message_id, "ORD-1");
    assert_eq!(delivery.correlation_id.as_deref(), Some(replayed.correlation_id.as_str()));
}
