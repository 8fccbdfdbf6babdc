//! Bounded Postgres connection pool with retried transactional execution.
//!
//! # Connection Pool Configuration
//! - Size bounded by `[min_connections, max_connections]` (max capped at 100)
//! - Acquire timeout equals the connect timeout; exceeding it yields
//!   [`DbReadyError::PoolExhausted`]
//! - `statement_timeout` and a UTC session time zone are applied to every
//!   new connection
//! - Connections return to the pool when the scoped handle is dropped

mod health;
mod retry;

pub use health::{ConnectionHealth, PoolStats};
pub use retry::retry_async;

use crate::Result;
use crate::config::{ConnectionConfig, PoolConfig};
use crate::error::DbReadyError;
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::{Connection, Executor};
use std::time::Instant;

/// Transaction mode for [`ConnectionPool::execute_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// No explicit transaction; every statement commits on its own
    Autocommit,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(self, read_only: bool) -> Option<String> {
        let level = match self {
            Self::Autocommit => return None,
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        };
        let access = if read_only { "READ ONLY" } else { "READ WRITE" };
        Some(format!("SET TRANSACTION ISOLATION LEVEL {} {}", level, access))
    }
}

/// Shared pool handle. Cloning is cheap and shares the underlying pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    config: PoolConfig,
    target: String,
}

impl ConnectionPool {
    /// Builds a pool for `connection` without opening any connection yet.
    ///
    /// # Errors
    /// Returns a configuration error if `config` fails validation.
    pub fn connect_lazy(connection: &ConnectionConfig, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let statement_timeout_ms = config.statement_timeout.as_millis();

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            // Apply session settings to EVERY new connection
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(
                        format!("SET statement_timeout = {}", statement_timeout_ms).as_str(),
                    )
                    .await?;
                    conn.execute("SET timezone = 'UTC'").await?;
                    Ok(())
                })
            })
            .connect_lazy_with(crate::resolver::connect_options(connection));

        tracing::debug!(
            "Created connection pool for {} ({}..{} connections)",
            connection,
            config.min_connections,
            config.max_connections
        );

        Ok(Self {
            pool,
            config,
            target: connection.to_string(),
        })
    }

    /// Builds the pool and verifies one connection can be acquired.
    ///
    /// # Errors
    /// Returns a configuration error for invalid settings, or the acquire
    /// failure if the database cannot be reached.
    pub async fn connect(connection: &ConnectionConfig, config: PoolConfig) -> Result<Self> {
        let pool = Self::connect_lazy(connection, config)?;
        drop(pool.acquire().await?);
        tracing::info!("Connection pool ready for {}", pool.target);
        Ok(pool)
    }

    /// The underlying sqlx pool.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a connection from the pool
    ///
    /// The connection is automatically returned to the pool when dropped.
    ///
    /// # Errors
    /// Returns `DbReadyError::PoolExhausted` if no connection frees up within
    /// the acquire timeout, or a connection error for other failures.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(|e| {
            DbReadyError::from_sqlx(
                format!("Failed to acquire connection to {}", self.target),
                e,
                self.config.connect_timeout,
            )
        })
    }

    /// Runs `operation` with retry, in a transaction at `isolation`.
    ///
    /// Every attempt acquires a fresh connection. On success the transaction
    /// commits, unless `read_only` is set, in which case it is rolled back.
    /// Failed attempts roll back before the connection is released.
    ///
    /// The operation's future must own what it uses (clone captured values
    /// into it) since it may run more than once.
    ///
    /// # Errors
    /// Returns the error of the last attempt once the retry policy is
    /// exhausted, or the first non-retryable error.
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn demo(pool: dbready_core::pool::ConnectionPool) -> dbready_core::Result<()> {
    /// use dbready_core::pool::IsolationLevel;
    ///
    /// let count: i64 = pool
    ///     .execute_with_retry(
    ///         |conn| {
    ///             Box::pin(async move {
    ///                 sqlx::query_scalar("SELECT count(*) FROM pg_tables")
    ///                     .fetch_one(conn)
    ///                     .await
    ///                     .map_err(|e| dbready_core::DbReadyError::query_failed("count tables", e))
    ///             })
    ///         },
    ///         IsolationLevel::ReadCommitted,
    ///         true,
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_with_retry<T, F>(
        &self,
        operation: F,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T>> + Send + Sync,
    {
        let operation = &operation;
        retry_async(&self.config.retry, "database operation", |_attempt| async move {
            let mut conn = self.acquire().await?;
            self.run_once(&mut conn, operation, isolation, read_only)
                .await
        })
        .await
    }

    async fn run_once<T, F>(
        &self,
        conn: &mut PgConnection,
        operation: &F,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<T>
    where
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
    {
        let Some(set_transaction) = isolation.set_transaction_sql(read_only) else {
            return operation(conn).await;
        };

        let timeout = self.config.connect_timeout;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| DbReadyError::from_sqlx("Failed to begin transaction", e, timeout))?;

        (&mut *tx)
            .execute(set_transaction.as_str())
            .await
            .map_err(|e| DbReadyError::from_sqlx("Failed to set isolation level", e, timeout))?;

        match operation(&mut *tx).await {
            Ok(value) => {
                let finish = if read_only {
                    tx.rollback().await
                } else {
                    tx.commit().await
                };
                finish.map_err(|e| {
                    DbReadyError::from_sqlx("Failed to finish transaction", e, timeout)
                })?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Rollback after failed operation also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Probes the server and reports pool and server-side connection usage.
    ///
    /// Never fails: problems are reported with `healthy = false`.
    pub async fn health_check(&self) -> ConnectionHealth {
        let start = Instant::now();
        let outcome = self.run_health_queries().await;
        let latency_ms = health::round_latency(start.elapsed());
        let pool = self.pool_statistics();
        let checked_at = chrono::Utc::now();

        match outcome {
            Ok((version, server_time, active)) => ConnectionHealth {
                healthy: true,
                latency_ms,
                server_version: Some(version),
                server_time: Some(server_time),
                active_connections: u32::try_from(active.max(0)).unwrap_or(u32::MAX),
                available_connections: health::available_connections(
                    self.config.max_connections,
                    active,
                ),
                error: None,
                pool,
                checked_at,
            },
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                ConnectionHealth {
                    healthy: false,
                    latency_ms,
                    server_version: None,
                    server_time: None,
                    active_connections: 0,
                    available_connections: 0,
                    error: Some(e.to_string()),
                    pool,
                    checked_at,
                }
            }
        }
    }

    async fn run_health_queries(&self) -> Result<(String, chrono::DateTime<chrono::Utc>, i64)> {
        let mut conn = self.acquire().await?;

        let (version, server_time): (String, chrono::DateTime<chrono::Utc>) =
            sqlx::query_as("SELECT version(), current_timestamp")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| DbReadyError::query_failed("Health check version query failed", e))?;

        let active: i64 =
            sqlx::query_scalar("SELECT count(*) FROM pg_stat_activity WHERE state = 'active'")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| DbReadyError::query_failed("Health check activity query failed", e))?;

        Ok((version, server_time, active))
    }

    /// Gets detailed connection pool statistics for monitoring
    pub fn pool_statistics(&self) -> PoolStats {
        let size = self.pool.size();
        // Convert to u32 safely, using saturating conversion to prevent overflow
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX);
        PoolStats {
            idle_connections: idle,
            active_connections: size.saturating_sub(idle),
            total_connections: size,
            max_connections: self.config.max_connections,
        }
    }

    /// Closes the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Connection pool for {} closed", self.target);
    }
}
