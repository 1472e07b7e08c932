//! # Order Intake Runtime
//!
//! Both halves of the order pipeline, written against the traits in
//! `order-intake-core` so any transport can sit underneath.
//!
//! ## Core Components
//!
//! - **`IntakeHandler`**: validates submissions, enforces idempotency keys and
//!   publishes each accepted order once
//! - **`IdempotencyCache`**: lock-sharded key → response map with a publish
//!   state per entry
//! - **`QueueOrderPublisher`**: maps envelopes onto queue messages
//! - **`OrderConsumer`**: decides how each delivery settles
//! - **`Dispatcher`**: receives deliveries and applies settlements with
//!   bounded concurrency
//!
//! ## Example
//!
//! ```ignore
//! use order_intake_runtime::{IdempotencyCache, IntakeConfig, IntakeHandler, QueueOrderPublisher};
//! use order_intake_core::environment::SystemClock;
//!
//! let intake = IntakeHandler::new(
//!     Arc::new(IdempotencyCache::new()),
//!     Arc::new(QueueOrderPublisher::new(queue)),
//!     Arc::new(SystemClock),
//!     IntakeConfig::default(),
//! );
//!
//! let response = intake.submit(Some("key-1"), body, &cancel).await?;
//! ```

/// Per-delivery settlement decisions
pub mod consumer;

/// Bounded-concurrency receive loop
pub mod dispatcher;

/// Idempotency-key cache
pub mod idempotency;

/// Order intake state machine
pub mod intake;

/// Prometheus metrics for observability
pub mod metrics;

/// Envelope to queue message mapping
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

pub use consumer::{FailureSimulation, OrderConsumer, Settlement};
pub use dispatcher::{DispatchSummary, Dispatcher, Outcome};
pub use idempotency::{CachedEntry, Claim, IdempotencyCache, PublishState};
pub use intake::{IntakeConfig, IntakeError, IntakeHandler};
pub use publisher::QueueOrderPublisher;
pub use retry::RetryPolicy;
