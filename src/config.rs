use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Application Configuration
// ============================================================================
//
// Read once at startup from the environment. Every variable is optional;
// a value that is present but malformed is an error rather than a silent
// fallback to the default.
//
// ============================================================================

pub const DEFAULT_LOG_FILTER: &str = "info,order_fulfillment=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string; `None` runs against the in-memory store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub metrics_port: u16,
    pub transaction_timeout: Duration,
    pub retry_max_attempts: u32,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            metrics_port: 9090,
            transaction_timeout: Duration::from_millis(5_000),
            retry_max_attempts: 3,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("FULFILLMENT_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.trim().is_empty());

        let timeout_ms: u64 = parse(
            &lookup,
            "FULFILLMENT_TX_TIMEOUT_MS",
            defaults.transaction_timeout.as_millis() as u64,
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FULFILLMENT_TX_TIMEOUT_MS",
                value: timeout_ms.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let retry_max_attempts = parse(
            &lookup,
            "FULFILLMENT_RETRY_MAX_ATTEMPTS",
            defaults.retry_max_attempts,
        )?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FULFILLMENT_RETRY_MAX_ATTEMPTS",
                value: retry_max_attempts.to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        Ok(Self {
            database_url,
            db_max_connections: parse(
                &lookup,
                "FULFILLMENT_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            metrics_port: parse(&lookup, "FULFILLMENT_METRICS_PORT", defaults.metrics_port)?,
            transaction_timeout: Duration::from_millis(timeout_ms),
            retry_max_attempts,
            log_filter: lookup("FULFILLMENT_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.retry_max_attempts)
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
