//! Recording doubles for [`OrderPublisher`] and [`OrderProcessor`].

use order_intake_core::processing::{OrderProcessor, ProcessingFault, ProcessingFuture};
use order_intake_core::transport::{TransportError, TransportFuture};
use order_intake_core::{OrderEnvelope, OrderPublisher};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publisher that records envelopes instead of sending them.
///
/// Failures queued with [`RecordingPublisher::fail_next`] are returned by the
/// following publish calls in order; an optional delay makes concurrent
/// submissions overlap.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<OrderEnvelope>>,
    failures: Mutex<VecDeque<TransportError>>,
    attempts: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    /// Creates a publisher that accepts everything immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher that sleeps for `delay` before each publish.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Makes the next publish attempt fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        lock(&self.failures).push_back(error);
    }

    /// Envelopes successfully published, in order.
    #[must_use]
    pub fn published(&self) -> Vec<OrderEnvelope> {
        lock(&self.published).clone()
    }

    /// Number of successful publishes.
    #[must_use]
    pub fn published_count(&self) -> usize {
        lock(&self.published).len()
    }

    /// Number of publish calls, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl OrderPublisher for RecordingPublisher {
    fn publish<'a>(&'a self, envelope: &'a OrderEnvelope) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failure = lock(&self.failures).pop_front();
            if let Some(error) = failure {
                return Err(error);
            }
            lock(&self.published).push(envelope.clone());
            Ok(())
        })
    }
}

/// A call observed by [`RecordingProcessor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedCall {
    /// Order that was processed
    pub order_id: String,
    /// Delivery count passed in
    pub delivery_count: u32,
    /// Whether the call succeeded
    pub succeeded: bool,
}

/// Processor that records each call and fails on request.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    calls: Mutex<Vec<ProcessedCall>>,
    scripted_failures: Mutex<HashMap<String, u32>>,
}

impl RecordingProcessor {
    /// Creates a processor that succeeds for every order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls for `order_id` with a transient fault.
    pub fn fail_times(&self, order_id: &str, times: u32) {
        lock(&self.scripted_failures).insert(order_id.to_string(), times);
    }

    /// Every call observed, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProcessedCall> {
        lock(&self.calls).clone()
    }

    /// Order ids of successful calls, in order.
    #[must_use]
    pub fn processed_order_ids(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.succeeded)
            .map(|call| call.order_id.clone())
            .collect()
    }
}

impl OrderProcessor for RecordingProcessor {
    fn process<'a>(&'a self, order: &'a OrderEnvelope, delivery_count: u32) -> ProcessingFuture<'a> {
        Box::pin(async move {
            let order_id = order.order_id.to_string();
            let fail = {
                let mut scripted = lock(&self.scripted_failures);
                match scripted.get_mut(&order_id) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };

            lock(&self.calls).push(ProcessedCall {
                order_id: order_id.clone(),
                delivery_count,
                succeeded: !fail,
            });

            if fail {
                Err(ProcessingFault::Transient(format!(
                    "scripted failure for order {order_id}"
                )))
            } else {
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::{helpers, test_clock};
    use order_intake_core::environment::Clock;

    #[tokio::test]
    async fn publisher_returns_queued_failures_in_order() {
        let publisher = RecordingPublisher::new();
        publisher.fail_next(TransportError::Unavailable("down".into()));
        let envelope = helpers::envelope("O1", "C1", test_clock().now());

        assert!(publisher.publish(&envelope).await.is_err());
        assert!(publisher.publish(&envelope).await.is_ok());
        assert_eq!(publisher.attempts(), 2);
        assert_eq!(publisher.published(), vec![envelope]);
    }

    #[tokio::test]
    async fn processor_fails_scripted_number_of_times() {
        let processor = RecordingProcessor::new();
        processor.fail_times("O1", 1);
        let envelope = helpers::envelope("O1", "C1", test_clock().now());

        assert!(processor.process(&envelope, 1).await.is_err());
        assert!(processor.process(&envelope, 2).await.is_ok());
        assert_eq!(processor.processed_order_ids(), vec!["O1".to_string()]);
        assert_eq!(processor.calls()[1].delivery_count, 2);
    }
}
