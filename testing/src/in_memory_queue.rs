//! In-memory queue with broker semantics.
//!
//! [`InMemoryQueue`] stands in for a durable queue in tests and local runs. It
//! keeps the parts of broker behaviour the pipeline depends on:
//!
//! - **Lock tokens**: each delivery is held in flight until settled
//! - **Delivery count**: starts at 1, incremented on every redelivery
//! - **Max delivery count**: an abandoned message that has used up its
//!   attempts is dead-lettered with [`DeadLetterReason::MaxDeliveryCountExceeded`]
//! - **Duplicate detection** (opt-in): a second send with a message id seen
//!   before is accepted and discarded
//! - **Lost settlements**: a settlement call that fails returns the message
//!   for redelivery (see [`InMemoryQueue::fail_next_settlement`])
//!
//! Settled messages stay inspectable through [`InMemoryQueue::completed`] and
//! [`InMemoryQueue::dead_lettered`].

use order_intake_core::transport::{
    DeadLetterReason, OutboundMessage, QueueReceiver, QueueSender, ReceivedMessage,
    TransportError, TransportFuture,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Default number of delivery attempts before the queue dead-letters a message.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

/// A message in the dead-letter sub-queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    /// The delivery that was dead-lettered
    pub message: ReceivedMessage,
    /// Reason code
    pub reason: DeadLetterReason,
    /// Error detail
    pub description: String,
}

#[derive(Debug)]
struct Queued {
    message: OutboundMessage,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Queued>,
    in_flight: HashMap<String, Queued>,
    completed: Vec<ReceivedMessage>,
    dead_lettered: Vec<DeadLetteredMessage>,
    seen_message_ids: HashSet<String>,
    settlement_failures: VecDeque<TransportError>,
    sent: usize,
    next_token: u64,
    closed: bool,
}

/// In-process queue implementing both [`QueueSender`] and [`QueueReceiver`].
///
/// # Example
///
/// ```
/// use order_intake_testing::InMemoryQueue;
///
/// let queue = InMemoryQueue::builder()
///     .max_delivery_count(3)
///     .duplicate_detection(true)
///     .build();
/// assert_eq!(queue.pending_len(), 0);
/// ```
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    max_delivery_count: u32,
    duplicate_detection: bool,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Creates a queue with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder.
    #[must_use]
    pub const fn builder() -> InMemoryQueueBuilder {
        InMemoryQueueBuilder {
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            duplicate_detection: false,
        }
    }

    /// Configured delivery attempt limit.
    #[must_use]
    pub const fn max_delivery_count(&self) -> u32 {
        self.max_delivery_count
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the next ready message without waiting.
    #[must_use]
    pub fn try_receive(&self) -> Option<ReceivedMessage> {
        let mut state = self.state();
        let queued = state.ready.pop_front()?;
        state.next_token += 1;
        let token = format!("lock-{}", state.next_token);
        let received = ReceivedMessage::from_outbound(
            queued.message.clone(),
            queued.delivery_count,
            token.clone(),
        );
        state.in_flight.insert(token, queued);
        Some(received)
    }

    /// Makes the next `complete`, `dead_letter` or `abandon` call fail with
    /// `error`. The delivery is returned for redelivery with its delivery
    /// count incremented, as if its lock had expired.
    pub fn fail_next_settlement(&self, error: TransportError) {
        self.state().settlement_failures.push_back(error);
    }

    /// Stops accepting sends.
    ///
    /// Receivers return `None` once no message is ready or in flight, so a
    /// delivery abandoned after closing is still received.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    /// Messages acknowledged by a consumer.
    #[must_use]
    pub fn completed(&self) -> Vec<ReceivedMessage> {
        self.state().completed.clone()
    }

    /// Messages in the dead-letter sub-queue.
    #[must_use]
    pub fn dead_lettered(&self) -> Vec<DeadLetteredMessage> {
        self.state().dead_lettered.clone()
    }

    /// Messages waiting for delivery.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state().ready.len()
    }

    /// Deliveries awaiting settlement.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Number of sends accepted, including discarded duplicates.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.state().sent
    }

    fn take_in_flight(state: &mut State, lock_token: &str) -> Result<Queued, TransportError> {
        state
            .in_flight
            .remove(lock_token)
            .ok_or_else(|| TransportError::UnknownLockToken(lock_token.to_string()))
    }

    /// Takes a delivery for settlement, or requeues it if a settlement
    /// failure is pending.
    fn take_for_settlement(state: &mut State, lock_token: &str) -> Result<Queued, TransportError> {
        let mut queued = Self::take_in_flight(state, lock_token)?;
        let Some(error) = state.settlement_failures.pop_front() else {
            return Ok(queued);
        };
        tracing::warn!(
            message_id = %queued.message.message_id,
            error = %error,
            "Settlement failed, message returned for redelivery"
        );
        queued.delivery_count += 1;
        state.ready.push_back(queued);
        Err(error)
    }

    fn is_drained(state: &State) -> bool {
        state.closed && state.ready.is_empty() && state.in_flight.is_empty()
    }
}

/// Builder for [`InMemoryQueue`].
#[derive(Debug, Clone)]
pub struct InMemoryQueueBuilder {
    max_delivery_count: u32,
    duplicate_detection: bool,
}

impl InMemoryQueueBuilder {
    /// Sets the number of delivery attempts before dead-lettering.
    ///
    /// Values below 1 are treated as 1.
    #[must_use]
    pub const fn max_delivery_count(mut self, max: u32) -> Self {
        self.max_delivery_count = if max == 0 { 1 } else { max };
        self
    }

    /// Enables discarding of sends whose message id was already seen.
    #[must_use]
    pub const fn duplicate_detection(mut self, enabled: bool) -> Self {
        self.duplicate_detection = enabled;
        self
    }

    /// Builds the queue.
    #[must_use]
    pub fn build(self) -> InMemoryQueue {
        InMemoryQueue {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_delivery_count: self.max_delivery_count,
            duplicate_detection: self.duplicate_detection,
        }
    }
}

impl QueueSender for InMemoryQueue {
    fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut state = self.state();
                if state.closed {
                    return Err(TransportError::Closed);
                }
                state.sent += 1;
                if self.duplicate_detection
                    && !state.seen_message_ids.insert(message.message_id.clone())
                {
                    tracing::debug!(
                        message_id = %message.message_id,
                        "Duplicate message id, discarding send"
                    );
                    return Ok(());
                }
                state.ready.push_back(Queued {
                    message,
                    delivery_count: 1,
                });
            }
            self.notify.notify_waiters();
            Ok(())
        })
    }
}

impl QueueReceiver for InMemoryQueue {
    fn receive(&self) -> TransportFuture<'_, Option<ReceivedMessage>> {
        Box::pin(async move {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(message) = self.try_receive() {
                    return Ok(Some(message));
                }
                if Self::is_drained(&self.state()) {
                    return Ok(None);
                }
                notified.await;
            }
        })
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let settled = {
                let mut state = self.state();
                Self::take_for_settlement(&mut state, &message.lock_token)
                    .map(|_| state.completed.push(message.clone()))
            };
            self.notify.notify_waiters();
            settled
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: DeadLetterReason,
        description: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let settled = {
                let mut state = self.state();
                Self::take_for_settlement(&mut state, &message.lock_token).map(|_| {
                    state.dead_lettered.push(DeadLetteredMessage {
                        message: message.clone(),
                        reason,
                        description: description.to_string(),
                    });
                })
            };
            self.notify.notify_waiters();
            settled
        })
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage, error: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let settled = {
                let mut state = self.state();
                Self::take_for_settlement(&mut state, &message.lock_token).map(|mut queued| {
                    if queued.delivery_count >= self.max_delivery_count {
                        tracing::warn!(
                            message_id = %message.message_id,
                            delivery_count = queued.delivery_count,
                            "Max delivery count reached, dead-lettering"
                        );
                        state.dead_lettered.push(DeadLetteredMessage {
                            message: message.clone(),
                            reason: DeadLetterReason::MaxDeliveryCountExceeded,
                            description: error.to_string(),
                        });
                    } else {
                        queued.delivery_count += 1;
                        state.ready.push_back(queued);
                    }
                })
            };
            self.notify.notify_waiters();
            settled
        })
    }
}
