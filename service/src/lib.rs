//! Process wiring for the `order-api` and `order-processor` binaries.
//!
//! - [`config`]: environment configuration
//! - [`telemetry`]: tracing subscriber setup
//! - [`processor`]: the processor's business step
//! - [`shutdown`]: signal handling and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod config;
pub mod processor;
pub mod shutdown;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use processor::LoggingOrderProcessor;
pub use shutdown::{Shutdown, shutdown_signal};
pub use telemetry::init_tracing;
