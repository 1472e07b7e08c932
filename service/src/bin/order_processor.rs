//! Order processor.
//!
//! Consumes the orders topic, runs each order through the consumer and
//! settles it: complete, dead-letter, or redeliver until the delivery bound.
//!
//! # Usage
//!
//! ```bash
//! SIMULATE_FAILURES=true cargo run -p order-intake-service --bin order-processor
//! ```

use order_intake_core::{OrderProcessor, QueueReceiver};
use order_intake_redpanda::RedpandaOrderQueue;
use order_intake_runtime::metrics::MetricsServer;
use order_intake_runtime::{Dispatcher, OrderConsumer};
use order_intake_service::{Config, LoggingOrderProcessor, Shutdown, init_tracing};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting order processor");

    let config = Config::from_env()?;
    let simulation = config.failure_simulation();
    info!(
        brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        consumer_group = %config.redpanda.consumer_group,
        max_delivery_count = config.redpanda.max_delivery_count,
        concurrency = config.processor.concurrency,
        simulate_failures = simulation.is_some(),
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr()?);
    metrics.start()?;

    let queue = RedpandaOrderQueue::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.topic)
        .dead_letter_topic(&config.redpanda.dead_letter_topic)
        .consumer_group(&config.redpanda.consumer_group)
        .max_delivery_count(config.redpanda.max_delivery_count)
        .build()?;
    let receiver: Arc<dyn QueueReceiver> = Arc::new(queue);

    let processor: Arc<dyn OrderProcessor> = Arc::new(LoggingOrderProcessor);
    let consumer = Arc::new(OrderConsumer::new(processor, simulation));
    let dispatcher = Dispatcher::new(receiver, consumer, config.processor.concurrency);

    let shutdown = Shutdown::on_signal(config.shutdown_timeout());
    let run = dispatcher.run(shutdown.stop.clone());
    tokio::pin!(run);

    tokio::select! {
        summary = &mut run => {
            info!(
                completed = summary.completed,
                dead_lettered = summary.dead_lettered,
                abandoned = summary.abandoned,
                settlement_errors = summary.settlement_errors,
                "Order processor stopped"
            );
        },
        () = shutdown.abort.cancelled() => {
            // Unsettled deliveries are redelivered from the last committed offset
            warn!("In-flight orders did not finish before the shutdown deadline");
        },
    }

    Ok(())
}
