//! Synchronous half of the pipeline: accept an order, publish it once.
//!
//! [`IntakeHandler::submit`] runs the per-request state machine:
//!
//! ```text
//! key present ──► cache hit ──────────────────────────► replay stored response
//!      │              │ (publish previously failed)
//!      │              └──► reclaim ──► republish stored envelope
//!      ▼
//! validate body ──► invalid ──► InvalidPayload (nothing cached, nothing sent)
//!      │
//!      ▼
//! new correlation id + envelope
//!      │
//!      ├── no key ─────────────────────► publish ──► 202
//!      └── key ──► claim ── lost ──────────────────► replay winner's response
//!                    └──── won ────────► publish ──► mark published / failed
//! ```

use crate::idempotency::{CachedEntry, Claim, IdempotencyCache, PublishState};
use crate::metrics::IntakeMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use order_intake_core::environment::Clock;
use order_intake_core::{
    AcceptedResponse, CorrelationId, OrderEnvelope, OrderPublisher, OrderRequest, TransportError,
    ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default deadline for one publish attempt.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned to the caller of [`IntakeHandler::submit`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// The request body is unusable. Client error; nothing was published.
    #[error("Invalid order payload: {0}")]
    InvalidPayload(#[from] ValidationError),

    /// The order was valid but could not be put on the queue.
    #[error("Failed to publish order {order_id}: {source}")]
    Publish {
        /// Order that failed to publish
        order_id: String,
        /// Transport failure
        #[source]
        source: TransportError,
    },
}

/// Publish settings for [`IntakeHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeConfig {
    /// Deadline for each publish attempt
    pub publish_timeout: Duration,
    /// Retry policy for retryable transport errors
    pub retry: RetryPolicy,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Accepts orders and publishes each idempotency key at most once.
pub struct IntakeHandler {
    cache: Arc<IdempotencyCache>,
    publisher: Arc<dyn OrderPublisher>,
    clock: Arc<dyn Clock>,
    config: IntakeConfig,
}

impl IntakeHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(
        cache: Arc<IdempotencyCache>,
        publisher: Arc<dyn OrderPublisher>,
        clock: Arc<dyn Clock>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            cache,
            publisher,
            clock,
            config,
        }
    }

    /// The cache this handler reads and writes.
    #[must_use]
    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    /// Handles one order submission.
    ///
    /// A blank or absent `idempotency_key` disables idempotency for the
    /// request. A cache hit returns the stored response without reading
    /// `body`.
    ///
    /// # Errors
    ///
    /// - [`IntakeError::InvalidPayload`] if `body` is not a valid order
    /// - [`IntakeError::Publish`] if the envelope could not be published,
    ///   including timeout and cancellation through `cancel`
    pub async fn submit(
        &self,
        idempotency_key: Option<&str>,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<AcceptedResponse, IntakeError> {
        let key = idempotency_key.filter(|key| !key.trim().is_empty());

        if let Some(key) = key {
            if let Some(entry) = self.cache.lookup(key) {
                return self.settle_existing(key, entry, cancel).await;
            }
        }

        let request = OrderRequest::from_json(body).inspect_err(|e| {
            IntakeMetrics::record_invalid_payload();
            tracing::warn!(error = %e, "Rejected invalid order payload");
        })?;

        let correlation_id = CorrelationId::generate();
        let envelope = OrderEnvelope::new(request, correlation_id.clone(), self.clock.now());
        let response = AcceptedResponse::new(correlation_id);

        let Some(key) = key else {
            self.publish(&envelope, cancel).await?;
            return Ok(response);
        };

        match self.cache.claim(key, response.clone(), envelope.clone()) {
            Claim::Won => {
                self.publish_claimed(key, &envelope, cancel).await?;
                Ok(response)
            }
            Claim::Existing(entry) => self.settle_existing(key, entry, cancel).await,
        }
    }

    /// Answers a request whose key is already cached.
    async fn settle_existing(
        &self,
        key: &str,
        entry: CachedEntry,
        cancel: &CancellationToken,
    ) -> Result<AcceptedResponse, IntakeError> {
        if entry.state == PublishState::Failed {
            if let Some(reclaimed) = self.cache.reclaim_failed(key) {
                if let Some(envelope) = &reclaimed.envelope {
                    tracing::info!(
                        order_id = %envelope.order_id,
                        correlation_id = %envelope.correlation_id,
                        "Retrying publish for idempotency key after earlier failure"
                    );
                    self.publish_claimed(key, envelope, cancel).await?;
                }
                return Ok(reclaimed.response);
            }
        }

        IntakeMetrics::record_replay();
        tracing::info!(
            correlation_id = %entry.response.correlation_id,
            "Returning cached response for idempotency key"
        );
        Ok(entry.response)
    }

    async fn publish_claimed(
        &self,
        key: &str,
        envelope: &OrderEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), IntakeError> {
        let mut claim = PendingClaim {
            cache: &self.cache,
            key,
            armed: true,
        };
        let result = self.publish(envelope, cancel).await;
        claim.armed = false;

        match result {
            Ok(()) => {
                self.cache.mark_published(key);
                Ok(())
            }
            Err(e) => {
                self.cache.mark_failed(key);
                Err(e)
            }
        }
    }

    async fn publish(
        &self,
        envelope: &OrderEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), IntakeError> {
        let publisher = &*self.publisher;
        let timeout = self.config.publish_timeout;

        let attempts = retry_with_predicate(
            &self.config.retry,
            move || async move {
                tokio::time::timeout(timeout, publisher.publish(envelope))
                    .await
                    .unwrap_or_else(|_elapsed| Err(TransportError::TimedOut(timeout)))
            },
            TransportError::is_retryable,
        );

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = attempts => result,
        };

        match result {
            Ok(()) => {
                IntakeMetrics::record_accepted();
                tracing::info!(
                    order_id = %envelope.order_id,
                    customer_id = %envelope.customer_id,
                    correlation_id = %envelope.correlation_id,
                    "Order accepted"
                );
                Ok(())
            }
            Err(source) => {
                IntakeMetrics::record_publish_failure();
                tracing::error!(
                    order_id = %envelope.order_id,
                    correlation_id = %envelope.correlation_id,
                    error = %source,
                    "Failed to publish order"
                );
                Err(IntakeError::Publish {
                    order_id: envelope.order_id.to_string(),
                    source,
                })
            }
        }
    }
}

/// Marks a claimed key failed if the publishing future is dropped, so the
/// entry never stays pending with nothing left to publish it.
struct PendingClaim<'a> {
    cache: &'a IdempotencyCache,
    key: &'a str,
    armed: bool,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Publish abandoned before completion, releasing idempotency key");
            self.cache.mark_failed(self.key);
        }
    }
}
