//! Pool sizing, timeouts and retry tunables.

use super::EnvSnapshot;
use crate::error::DbReadyError;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on pool size accepted by validation.
const MAX_POOL_SIZE: u32 = 100;

/// Backoff policy for retried operations.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Configuration for the connection pool.
///
/// # Example
/// ```rust
/// use dbready_core::config::PoolConfig;
///
/// let config = PoolConfig::default().with_max_connections(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// Connections kept open while idle
    pub min_connections: u32,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connection and acquisition timeout
    pub connect_timeout: Duration,
    /// Per-statement timeout applied on every pooled connection
    pub statement_timeout: Duration,
    /// Idle connections above the minimum are closed after this long
    pub idle_timeout: Duration,
    /// Connections are recycled after this long
    pub max_lifetime: Duration,
    /// Retry policy for `execute_with_retry`
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Reads `DB_POOL_MIN`, `DB_POOL_MAX`, `DB_TIMEOUT`,
    /// `DB_RETRY_ATTEMPTS` and `DB_RETRY_DELAY`, falling back to defaults.
    ///
    /// # Errors
    /// Returns a configuration error naming the variable that failed to
    /// parse, or the constraint the combined values violate.
    pub fn from_snapshot(env: &EnvSnapshot) -> crate::Result<Self> {
        let defaults = Self::default();

        let base_delay = match parse_var::<f64>(env, "DB_RETRY_DELAY")? {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                DbReadyError::configuration(format!(
                    "DB_RETRY_DELAY must be a non-negative number of seconds, got '{}'",
                    secs
                ))
            })?,
            None => defaults.retry.base_delay,
        };

        let config = Self {
            min_connections: parse_var(env, "DB_POOL_MIN")?.unwrap_or(defaults.min_connections),
            max_connections: parse_var(env, "DB_POOL_MAX")?.unwrap_or(defaults.max_connections),
            connect_timeout: parse_var(env, "DB_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            retry: RetryPolicy {
                max_attempts: parse_var(env, "DB_RETRY_ATTEMPTS")?
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay,
            },
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates pool configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_connections == 0 {
            return Err(DbReadyError::configuration(
                "min_connections must be greater than 0",
            ));
        }

        if self.max_connections < self.min_connections {
            return Err(DbReadyError::configuration(format!(
                "max_connections ({}) must not be below min_connections ({})",
                self.max_connections, self.min_connections
            )));
        }

        if self.max_connections > MAX_POOL_SIZE {
            return Err(DbReadyError::configuration(format!(
                "max_connections should not exceed {} for safety",
                MAX_POOL_SIZE
            )));
        }

        if self.connect_timeout.is_zero() {
            return Err(DbReadyError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.statement_timeout.is_zero() {
            return Err(DbReadyError::configuration(
                "statement_timeout must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(DbReadyError::configuration(
                "retry attempts must be at least 1",
            ));
        }

        Ok(())
    }

    /// Builder method to set the pool bounds.
    pub fn with_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Builder method to set max connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_var<T>(env: &EnvSnapshot, key: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
{
    env.get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                DbReadyError::configuration(format!("{} has an invalid value '{}'", key, raw))
            })
        })
        .transpose()
}
