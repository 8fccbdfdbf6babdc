//! Pool health reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Pool statistics for monitoring connection pool health and usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of idle connections ready to be used
    pub idle_connections: u32,
    /// Number of connections currently in use
    pub active_connections: u32,
    /// Total number of connections in the pool
    pub total_connections: u32,
    /// Maximum allowed connections (from configuration)
    pub max_connections: u32,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub healthy: bool,
    /// Round-trip time of the health queries, in milliseconds
    pub latency_ms: f64,
    pub server_version: Option<String>,
    pub server_time: Option<DateTime<Utc>>,
    /// Server-wide sessions currently executing a statement
    pub active_connections: u32,
    /// Configured maximum minus active, floored at zero
    pub available_connections: u32,
    pub error: Option<String>,
    pub pool: PoolStats,
    pub checked_at: DateTime<Utc>,
}

/// Connections still available under `max` when `active` are in use.
pub(crate) fn available_connections(max: u32, active: i64) -> u32 {
    let active = u32::try_from(active.max(0)).unwrap_or(u32::MAX);
    max.saturating_sub(active)
}

/// Rounds a latency to two decimals.
pub(crate) fn round_latency(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_available_connections_floor() {
        assert_eq!(available_connections(10, 3), 7);
        assert_eq!(available_connections(10, 25), 0);
        assert_eq!(available_connections(10, -1), 10);
    }

    #[test]
    fn test_round_latency() {
        assert_eq!(round_latency(Duration::from_micros(12_346)), 12.35);
        assert_eq!(round_latency(Duration::ZERO), 0.0);
    }
}
