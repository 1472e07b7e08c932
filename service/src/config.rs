//! Configuration management for the order intake services.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike an unset variable, a set but unparseable one is an error.

use order_intake_core::CustomerId;
use order_intake_runtime::{FailureSimulation, IntakeConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Environment variable name
        var: String,
        /// Offending value
        value: String,
        /// Parse error
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Broker and topic configuration
    pub redpanda: RedpandaConfig,
    /// Intake publish configuration
    pub intake: IntakeSettings,
    /// Order processor configuration
    pub processor: ProcessorConfig,
    /// HTTP and metrics server configuration
    pub server: ServerConfig,
}

/// Redpanda/Kafka configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Orders topic
    pub topic: String,
    /// Dead-letter topic
    pub dead_letter_topic: String,
    /// Consumer group for the order processor
    pub consumer_group: String,
    /// Deliveries before a faulting order is dead-lettered
    pub max_delivery_count: u32,
}

/// Publish behavior of the intake API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeSettings {
    /// Deadline for one publish attempt, in milliseconds
    pub publish_timeout_ms: u64,
    /// Extra publish attempts for retryable transport errors
    pub publish_max_retries: usize,
}

/// Order processor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Deliveries processed at once
    pub concurrency: usize,
    /// Fault every order of `simulated_failure_customer_id`
    pub simulate_failures: bool,
    /// Sentinel customer for failure simulation
    pub simulated_failure_customer_id: String,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric or boolean variable is
    /// set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric or boolean variable is
    /// set to an unparseable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            redpanda: RedpandaConfig {
                brokers: string("REDPANDA_BROKERS", "localhost:9092"),
                topic: string("ORDERS_TOPIC", order_intake_redpanda::DEFAULT_TOPIC),
                dead_letter_topic: string(
                    "ORDERS_DEAD_LETTER_TOPIC",
                    order_intake_redpanda::DEFAULT_DEAD_LETTER_TOPIC,
                ),
                consumer_group: string("CONSUMER_GROUP", "order-processor"),
                max_delivery_count: parsed(
                    &lookup,
                    "MAX_DELIVERY_COUNT",
                    order_intake_redpanda::DEFAULT_MAX_DELIVERY_COUNT,
                )?,
            },
            intake: IntakeSettings {
                publish_timeout_ms: parsed(&lookup, "PUBLISH_TIMEOUT_MS", 5000)?,
                publish_max_retries: parsed(&lookup, "PUBLISH_MAX_RETRIES", 0)?,
            },
            processor: ProcessorConfig {
                concurrency: parsed(
                    &lookup,
                    "PROCESSOR_CONCURRENCY",
                    order_intake_runtime::dispatcher::DEFAULT_CONCURRENCY,
                )?,
                simulate_failures: parsed(&lookup, "SIMULATE_FAILURES", false)?,
                simulated_failure_customer_id: string(
                    "SIMULATED_FAILURE_CUSTOMER_ID",
                    order_intake_runtime::consumer::DEFAULT_SIMULATED_FAILURE_CUSTOMER,
                ),
            },
            server: ServerConfig {
                host: string("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8080)?,
                metrics_host: string("METRICS_HOST", "0.0.0.0"),
                metrics_port: parsed(&lookup, "METRICS_PORT", 9090)?,
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT", 30)?,
            },
        })
    }

    /// Publish settings for the intake handler.
    #[must_use]
    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            publish_timeout: Duration::from_millis(self.intake.publish_timeout_ms),
            retry: RetryPolicy::builder()
                .max_retries(self.intake.publish_max_retries)
                .build(),
        }
    }

    /// Failure simulation for the consumer, if enabled.
    #[must_use]
    pub fn failure_simulation(&self) -> Option<FailureSimulation> {
        self.processor.simulate_failures.then(|| FailureSimulation {
            customer_id: CustomerId::new(&self.processor.simulated_failure_customer_id),
        })
    }

    /// Graceful shutdown deadline.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }
}

impl ServerConfig {
    /// HTTP bind address as `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Prometheus exporter address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `METRICS_HOST` is not an IP address.
    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.metrics_host, self.metrics_port);
        addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            var: "METRICS_HOST".to_string(),
            value: self.metrics_host.clone(),
            reason: e.to_string(),
        })
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.redpanda.brokers, "localhost:9092");
        assert_eq!(config.redpanda.topic, "orders");
        assert_eq!(config.redpanda.dead_letter_topic, "orders.dlq");
        assert_eq!(config.redpanda.consumer_group, "order-processor");
        assert_eq!(config.redpanda.max_delivery_count, 10);
        assert_eq!(config.intake.publish_timeout_ms, 5000);
        assert_eq!(config.intake.publish_max_retries, 0);
        assert_eq!(config.processor.concurrency, 8);
        assert!(!config.processor.simulate_failures);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(config.failure_simulation().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("REDPANDA_BROKERS", "kafka:29092"),
            ("MAX_DELIVERY_COUNT", "3"),
            ("PUBLISH_TIMEOUT_MS", "250"),
            ("PUBLISH_MAX_RETRIES", "2"),
            ("PORT", "3000"),
        ])
        .unwrap();

        assert_eq!(config.redpanda.brokers, "kafka:29092");
        assert_eq!(config.redpanda.max_delivery_count, 3);
        assert_eq!(config.server.port, 3000);

        let intake = config.intake_config();
        assert_eq!(intake.publish_timeout, Duration::from_millis(250));
        assert_eq!(intake.retry.max_retries, 2);
    }

    #[test]
    fn test_failure_simulation_toggle() {
        let config = load(&[
            ("SIMULATE_FAILURES", "true"),
            ("SIMULATED_FAILURE_CUSTOMER_ID", "BROKEN"),
        ])
        .unwrap();

        let simulation = config.failure_simulation().unwrap();
        assert_eq!(simulation.customer_id.as_str(), "BROKEN");
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        let ConfigError::Invalid { var, value, .. } = err;
        assert_eq!(var, "PORT");
        assert_eq!(value, "eighty");
    }

    #[test]
    fn test_invalid_bool_is_reported() {
        assert!(load(&[("SIMULATE_FAILURES", "yes")]).is_err());
    }

    #[test]
    fn test_metrics_addr() {
        let config = load(&[("METRICS_HOST", "127.0.0.1"), ("METRICS_PORT", "9100")]).unwrap();
        assert_eq!(
            config.server.metrics_addr().unwrap(),
            "127.0.0.1:9100".parse::<SocketAddr>().unwrap()
        );

        let config = load(&[("METRICS_HOST", "metrics.local")]).unwrap();
        assert!(config.server.metrics_addr().is_err());
    }
}
