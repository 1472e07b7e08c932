//! Processor wiring driven by configuration, against an in-memory queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use order_intake_core::{DeadLetterReason, OrderProcessor, QueueReceiver, QueueSender};
use order_intake_runtime::{Dispatcher, IdempotencyCache, IntakeHandler, OrderConsumer, Outcome, QueueOrderPublisher};
use order_intake_service::{Config, LoggingOrderProcessor};
use order_intake_testing::{InMemoryQueue, helpers, test_clock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn config(vars: &[(&str, &str)]) -> Config {
    let vars: HashMap<&str, &str> = vars.iter().copied().collect();
    Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap()
}

struct Wiring {
    queue: Arc<InMemoryQueue>,
    intake: IntakeHandler,
    dispatcher: Dispatcher,
}

fn wire(config: &Config) -> Wiring {
    let queue = Arc::new(
        InMemoryQueue::builder()
            .max_delivery_count(config.redpanda.max_delivery_count)
            .build(),
    );
    let sender: Arc<dyn QueueSender> = queue.clone();
    let receiver: Arc<dyn QueueReceiver> = queue.clone();
    let processor: Arc<dyn OrderProcessor> = Arc::new(LoggingOrderProcessor);

    let intake = IntakeHandler::new(
        Arc::new(IdempotencyCache::new()),
        Arc::new(QueueOrderPublisher::new(sender)),
        Arc::new(test_clock()),
        config.intake_config(),
    );
    let consumer = Arc::new(OrderConsumer::new(processor, config.failure_simulation()));
    let dispatcher = Dispatcher::new(receiver, consumer, config.processor.concurrency);

    Wiring {
        queue,
        intake,
        dispatcher,
    }
}

#[tokio::test]
async fn configured_sentinel_customer_is_dead_lettered_after_max_deliveries() {
    let wiring = wire(&config(&[
        ("SIMULATE_FAILURES", "true"),
        ("SIMULATED_FAILURE_CUSTOMER_ID", "BROKEN"),
        ("MAX_DELIVERY_COUNT", "2"),
    ]));
    let cancel = CancellationToken::new();
    wiring
        .intake
        .submit(Some("k-broken"), &helpers::request_body("ORD-B", "BROKEN"), &cancel)
        .await
        .unwrap();
    wiring
        .intake
        .submit(None, &helpers::request_body("ORD-OK", "FAIL"), &cancel)
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    while let Some(delivery) = wiring.queue.try_receive() {
        outcomes.push((
            delivery.message_id.clone(),
            wiring.dispatcher.dispatch_one(delivery).await.unwrap(),
        ));
    }

    // The default sentinel is not special once another one is configured
    assert!(outcomes.contains(&("ORD-OK".to_string(), Outcome::Completed)));
    assert_eq!(
        outcomes
            .iter()
            .filter(|(id, outcome)| id == "ORD-B" && *outcome == Outcome::Abandoned)
            .count(),
        2
    );

    let dead = wiring.queue.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.message_id, "ORD-B");
    assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliveryCountExceeded);
}

#[tokio::test]
async fn simulation_disabled_completes_every_order() {
    let wiring = wire(&config(&[]));
    wiring
        .intake
        .submit(None, &helpers::request_body("ORD-F", "FAIL"), &CancellationToken::new())
        .await
        .unwrap();

    wiring.queue.close();
    let summary = wiring.dispatcher.run(CancellationToken::new()).await;

    assert_eq!(summary.completed, 1);
    assert!(wiring.queue.dead_lettered().is_empty());
}
