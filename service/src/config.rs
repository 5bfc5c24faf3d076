//! Service configuration.

use std::time::Duration;

use bankrupt_ledger::PgStoreOptions;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. `None` runs against the in-memory store.
    pub url: Option<String>,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    pub fn store_options(&self) -> PgStoreOptions {
        PgStoreOptions {
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

/// Retry policy for transfers that fail with a retryable error.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per request, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly after that.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryConfig {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Node ID, used in logs.
    pub node_id: Option<String>,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Capacity of the transfer notification queue.
    pub notify_queue_capacity: usize,
    /// How long `stop` waits for in-flight transfers.
    pub drain_timeout: Duration,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            notify_queue_capacity: 1024,
            drain_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("NODE_ID") {
            config.node_id = Some(id);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }

        if let Some(max) = env_parse("DB_MAX_CONNECTIONS") {
            config.database.max_connections = max;
        }

        if let Some(ms) = env_parse("DB_ACQUIRE_TIMEOUT_MS") {
            config.database.acquire_timeout = Duration::from_millis(ms);
        }

        if let Some(attempts) = env_parse("TRANSFER_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }

        if let Some(ms) = env_parse("TRANSFER_RETRY_BACKOFF_MS") {
            config.retry.backoff = Duration::from_millis(ms);
        }

        if let Some(capacity) = env_parse("NOTIFY_QUEUE_CAPACITY") {
            config.notify_queue_capacity = capacity;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.database.url, Some(url) if url.is_empty()) {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database max connections cannot be 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Transfer max attempts cannot be 0".to_string());
        }

        if self.notify_queue_capacity == 0 {
            return Err("Notification queue capacity cannot be 0".to_string());
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.database.url = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryConfig {
            max_attempts: 4,
            backoff: Duration::from_millis(10),
        };
        assert_eq!(retry.delay_before(1), Duration::ZERO);
        assert_eq!(retry.delay_before(2), Duration::from_millis(10));
        assert_eq!(retry.delay_before(4), Duration::from_millis(30));
    }
}
