//! Pulls deliveries from a [`QueueReceiver`] and settles them.
//!
//! The dispatcher runs one task per delivery, bounded by a semaphore, and
//! applies the [`OrderConsumer`]'s decision:
//!
//! | Consumer result                  | Transport call |
//! |----------------------------------|----------------|
//! | `Ok(Settlement::Complete)`       | `complete`     |
//! | `Ok(Settlement::DeadLetter)`     | `dead_letter`  |
//! | `Err(ProcessingFault)`           | `abandon`      |
//!
//! No ordering is guaranteed between orders.

use crate::consumer::{OrderConsumer, Settlement};
use crate::metrics::ConsumerMetrics;
use order_intake_core::{DeadLetterReason, QueueReceiver, ReceivedMessage, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default number of deliveries processed at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledged
    Completed,
    /// Moved to the dead-letter queue by the consumer
    DeadLettered(DeadLetterReason),
    /// Released for redelivery after a processing fault
    Abandoned,
}

/// Counts of settled deliveries, returned when [`Dispatcher::run`] stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Deliveries completed
    pub completed: usize,
    /// Deliveries dead-lettered by the consumer
    pub dead_lettered: usize,
    /// Deliveries abandoned for redelivery
    pub abandoned: usize,
    /// Deliveries whose settlement call failed
    pub settlement_errors: usize,
}

impl DispatchSummary {
    fn record(&mut self, result: &Result<Outcome, TransportError>) {
        match result {
            Ok(Outcome::Completed) => self.completed += 1,
            Ok(Outcome::DeadLettered(_)) => self.dead_lettered += 1,
            Ok(Outcome::Abandoned) => self.abandoned += 1,
            Err(_) => self.settlement_errors += 1,
        }
    }
}

/// Receives and settles orders with bounded concurrency.
#[derive(Clone)]
pub struct Dispatcher {
    receiver: Arc<dyn QueueReceiver>,
    consumer: Arc<OrderConsumer>,
    concurrency: usize,
}

impl Dispatcher {
    /// Creates a dispatcher. A `concurrency` of 0 is treated as 1.
    #[must_use]
    pub fn new(
        receiver: Arc<dyn QueueReceiver>,
        consumer: Arc<OrderConsumer>,
        concurrency: usize,
    ) -> Self {
        Self {
            receiver,
            consumer,
            concurrency: concurrency.max(1),
        }
    }

    /// Handles and settles a single delivery.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] from the settlement call. The transport
    /// keeps a delivery it failed to settle and hands it out again through
    /// `receive`.
    pub async fn dispatch_one(&self, message: ReceivedMessage) -> Result<Outcome, TransportError> {
        match self.consumer.handle(&message).await {
            Ok(Settlement::Complete { order_id }) => {
                self.receiver.complete(&message).await?;
                ConsumerMetrics::record_completed();
                tracing::debug!(order_id = %order_id, "Message completed");
                Ok(Outcome::Completed)
            }
            Ok(Settlement::DeadLetter {
                reason,
                description,
            }) => {
                self.receiver
                    .dead_letter(&message, reason, &description)
                    .await?;
                ConsumerMetrics::record_dead_lettered(reason);
                tracing::warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "Message dead-lettered"
                );
                Ok(Outcome::DeadLettered(reason))
            }
            Err(fault) => {
                self.receiver.abandon(&message, &fault.to_string()).await?;
                Ok(Outcome::Abandoned)
            }
        }
    }

    /// Runs until `shutdown` is cancelled or the receiver closes.
    ///
    /// In-flight deliveries are allowed to finish before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> DispatchSummary {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut summary = DispatchSummary::default();

        tracing::info!(concurrency = self.concurrency, "Order dispatcher started");

        loop {
            let permit = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.receiver.receive() => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!("Receiver closed, stopping dispatcher");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive message");
                    drop(permit);
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let dispatcher = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                let message_id = message.message_id.clone();
                let result = dispatcher.dispatch_one(message).await;
                if let Err(e) = &result {
                    tracing::error!(message_id = %message_id, error = %e, "Failed to settle message");
                }
                result
            });

            while let Some(joined) = workers.try_join_next() {
                Self::collect(&mut summary, joined);
            }
        }

        while let Some(joined) = workers.join_next().await {
            Self::collect(&mut summary, joined);
        }

        tracing::info!(
            completed = summary.completed,
            dead_lettered = summary.dead_lettered,
            abandoned = summary.abandoned,
            settlement_errors = summary.settlement_errors,
            "Order dispatcher stopped"
        );
        summary
    }

    fn collect(
        summary: &mut DispatchSummary,
        joined: Result<Result<Outcome, TransportError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(result) => summary.record(&result),
            Err(e) => {
                tracing::error!(error = %e, "Dispatch task failed");
                summary.settlement_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use order_intake_core::QueueSender;
    use std::collections::HashSet;
    use order_intake_core::environment::Clock;
    use order_intake_testing::{InMemoryQueue, RecordingProcessor, helpers, test_clock};

    fn dispatcher(queue: &Arc<InMemoryQueue>, processor: Arc<RecordingProcessor>) -> Dispatcher {
        let receiver: Arc<dyn QueueReceiver> = queue.clone();
        Dispatcher::new(receiver, Arc::new(OrderConsumer::new(processor, None)), 4)
    }

    #[tokio::test]
    async fn dispatch_one_applies_settlement() {
        let queue = Arc::new(InMemoryQueue::new());
        let processor = Arc::new(RecordingProcessor::new());
        processor.fail_times("O2", 1);
        let dispatcher = dispatcher(&queue, processor);

        let ok = helpers::envelope("O1", "C1", test_clock().now());
        let faulty = helpers::envelope("O2", "C1", test_clock().now());
        queue.send(helpers::envelope_message(&ok)).await.unwrap();
        queue.send(helpers::envelope_message(&faulty)).await.unwrap();
        queue.send(helpers::raw_message("junk", b"???")).await.unwrap();

        let first = queue.try_receive().unwrap();
        assert_eq!(dispatcher.dispatch_one(first).await, Ok(Outcome::Completed));
        let second = queue.try_receive().unwrap();
        assert_eq!(dispatcher.dispatch_one(second).await, Ok(Outcome::Abandoned));
        let third = queue.try_receive().unwrap();
        assert_eq!(
            dispatcher.dispatch_one(third).await,
            Ok(Outcome::DeadLettered(DeadLetterReason::DeserializationFailed))
        );

        let redelivered = queue.try_receive().unwrap();
        assert_eq!(redelivered.message_id, "O2");
        assert_eq!(redelivered.delivery_count, 2);
    }

    #[tokio::test]
    async fn run_drains_queue_until_closed() {
        let queue = Arc::new(InMemoryQueue::new());
        let processor = Arc::new(RecordingProcessor::new());
        let dispatcher = dispatcher(&queue, processor.clone());

        for i in 0..10 {
            let envelope = helpers::envelope(&format!("O{i}"), "C1", test_clock().now());
            queue.send(helpers::envelope_message(&envelope)).await.unwrap();
        }
        queue.close();

        let summary = dispatcher.run(CancellationToken::new()).await;

        assert_eq!(summary.completed, 10);
        assert_eq!(queue.completed().len(), 10);
        assert_eq!(processor.processed_order_ids().len(), 10);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        let dispatcher = dispatcher(&queue, Arc::new(RecordingProcessor::new()));
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(shutdown).await })
        };
        shutdown.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary, DispatchSummary::default());
    }

    #[tokio::test]
    async fn failed_settlement_is_redelivered_and_completed() {
        let queue = Arc::new(InMemoryQueue::new());
        let processor = Arc::new(RecordingProcessor::new());
        let dispatcher = dispatcher(&queue, processor.clone());

        let envelope = helpers::envelope("O1", "C1", test_clock().now());
        queue.send(helpers::envelope_message(&envelope)).await.unwrap();
        queue.fail_next_settlement(TransportError::Unavailable("broker down".to_string()));
        queue.close();

        let run = dispatcher.run(CancellationToken::new());
        let summary = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();

        assert_eq!(summary.settlement_errors, 1);
        assert_eq!(summary.completed, 1);
        let completed = queue.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].delivery_count, 2);
        assert_eq!(processor.processed_order_ids(), vec!["O1".to_string(), "O1".to_string()]);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn run_after_close_still_retries_abandoned_deliveries() {
        let queue = Arc::new(InMemoryQueue::new());
        let processor = Arc::new(RecordingProcessor::new());
        processor.fail_times("O1", 1);
        let dispatcher = dispatcher(&queue, processor.clone());

        for id in ["O1", "O2"] {
            let envelope = helpers::envelope(id, "C1", test_clock().now());
            queue.send(helpers::envelope_message(&envelope)).await.unwrap();
        }
        queue.close();

        let run = dispatcher.run(CancellationToken::new());
        let summary = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();

        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.completed, 2);
        let completed: HashSet<String> = queue
            .completed()
            .into_iter()
            .map(|message| message.message_id)
            .collect();
        assert_eq!(completed, HashSet::from(["O1".to_string(), "O2".to_string()]));
        assert_eq!(queue.pending_len(), 0);
    }
}
