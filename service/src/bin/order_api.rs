//! Order intake HTTP API.
//!
//! Accepts `POST /api/v1/orders`, deduplicates by `Idempotency-Key` and
//! publishes accepted orders to the orders topic.
//!
//! # Usage
//!
//! ```bash
//! REDPANDA_BROKERS=localhost:9092 cargo run -p order-intake-service --bin order-api
//! ```

use order_intake_core::environment::SystemClock;
use order_intake_core::{OrderPublisher, QueueSender};
use order_intake_redpanda::RedpandaOrderQueue;
use order_intake_runtime::metrics::MetricsServer;
use order_intake_runtime::{IdempotencyCache, IntakeHandler, QueueOrderPublisher};
use order_intake_service::{Config, Shutdown, init_tracing};
use order_intake_web::{AppState, build_router};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting order intake API");

    let config = Config::from_env()?;
    info!(
        brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        publish_timeout_ms = config.intake.publish_timeout_ms,
        publish_max_retries = config.intake.publish_max_retries,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr()?);
    metrics.start()?;

    // Send-only: no consumer group
    let queue = RedpandaOrderQueue::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.topic)
        .dead_letter_topic(&config.redpanda.dead_letter_topic)
        .build()?;
    let sender: Arc<dyn QueueSender> = Arc::new(queue);
    let publisher: Arc<dyn OrderPublisher> = Arc::new(QueueOrderPublisher::new(sender));

    let intake = IntakeHandler::new(
        Arc::new(IdempotencyCache::new()),
        publisher,
        Arc::new(SystemClock),
        config.intake_config(),
    );

    let shutdown = Shutdown::on_signal(config.shutdown_timeout());
    let state = AppState::new(Arc::new(intake)).with_shutdown(shutdown.abort.clone());
    let app = build_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.stop.cancelled_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}
