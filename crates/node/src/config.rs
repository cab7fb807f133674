//! Node configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use resilience::{CircuitBreakerConfig, RetryPolicy};
use saga::topology::DeliverySettings;

/// Settings for one node process.
///
/// Reads from environment variables, falling back to the defaults below
/// when a variable is absent or does not parse:
/// - `HOST`, `PORT`: bind address (`0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter (`info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `SERVICE_INSTANCE_ID`: member name prefix for this node's workers
/// - `PRODUCT_SERVICE_URL`, `PRODUCT_SERVICE_TIMEOUT_MS`
/// - `BREAKER_FAILURE_THRESHOLD`, `BREAKER_SUCCESS_THRESHOLD`,
///   `BREAKER_TIMEOUT_MS`, `BREAKER_RESET_TIMEOUT_MS`
/// - `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`, `RETRY_MAX_DELAY_MS`
/// - `BROKER_MAX_DELIVER`, `BROKER_ACK_WAIT_MS`
/// - `CONSUMER_INSTANCES`: queue-group members per service
/// - `PAYMENT_WEBHOOK_SECRET`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub instance_id: String,
    pub product_service_url: String,
    pub product_service_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_timeout: Duration,
    pub breaker_reset_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub broker_max_deliver: u32,
    pub broker_ack_wait: Duration,
    pub consumer_instances: usize,
    pub webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var_or("HOST", defaults.host),
            port: parse_or("PORT", defaults.port),
            log_level: var_or("RUST_LOG", defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            instance_id: var_or("SERVICE_INSTANCE_ID", defaults.instance_id),
            product_service_url: var_or("PRODUCT_SERVICE_URL", defaults.product_service_url),
            product_service_timeout: millis_or("PRODUCT_SERVICE_TIMEOUT_MS", defaults.product_service_timeout),
            breaker_failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", defaults.breaker_failure_threshold),
            breaker_success_threshold: parse_or("BREAKER_SUCCESS_THRESHOLD", defaults.breaker_success_threshold),
            breaker_timeout: millis_or("BREAKER_TIMEOUT_MS", defaults.breaker_timeout),
            breaker_reset_timeout: millis_or("BREAKER_RESET_TIMEOUT_MS", defaults.breaker_reset_timeout),
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_initial_delay: millis_or("RETRY_INITIAL_DELAY_MS", defaults.retry_initial_delay),
            retry_max_delay: millis_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            broker_max_deliver: parse_or("BROKER_MAX_DELIVER", defaults.broker_max_deliver),
            broker_ack_wait: millis_or("BROKER_ACK_WAIT_MS", defaults.broker_ack_wait),
            consumer_instances: parse_or("CONSUMER_INSTANCES", defaults.consumer_instances).max(1),
            webhook_secret: var_or("PAYMENT_WEBHOOK_SECRET", defaults.webhook_secret),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.breaker_failure_threshold)
            .with_success_threshold(self.breaker_success_threshold)
            .with_timeout(self.breaker_timeout)
            .with_reset_timeout(self.breaker_reset_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry_max_attempts)
            .with_initial_delay(self.retry_initial_delay)
            .with_max_delay(self.retry_max_delay)
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            max_deliver: self.broker_max_deliver,
            ack_wait: self.broker_ack_wait,
            ..DeliverySettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            instance_id: "node-1".to_string(),
            product_service_url: "http://localhost:3001".to_string(),
            product_service_timeout: Duration::from_secs(3),
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_timeout: Duration::from_secs(3),
            breaker_reset_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
            broker_max_deliver: 5,
            broker_ack_wait: Duration::from_secs(30),
            consumer_instances: 2,
            webhook_secret: String::new(),
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn millis_or(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
