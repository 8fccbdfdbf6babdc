//! Configuration snapshot for resolution, pooling and DDL application.
//!
//! Everything is read once into [`Settings`] and passed down by value or
//! reference; nothing below this module looks at the process environment.

mod connection;
pub mod dotenv;
mod pool;
mod snapshot;

pub use connection::{
    ConnectionConfig, ConnectionOverrides, DEFAULT_DATABASE, DEFAULT_PORT, DEFAULT_USER,
};
pub use dotenv::DotenvSearch;
pub use pool::{PoolConfig, RetryPolicy};
pub use snapshot::EnvSnapshot;

use std::path::PathBuf;
use std::time::Duration;

/// Default DDL directory, relative to the working directory.
pub const DEFAULT_DDL_DIR: &str = "etl/sql";

/// Timeouts and markers used while probing the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// File whose presence marks a container
    pub container_marker: PathBuf,
    /// TCP timeout per resolution candidate
    pub candidate_timeout: Duration,
    /// TCP timeout before the authenticated round trip in validation
    pub validation_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            container_marker: PathBuf::from("/.dockerenv"),
            candidate_timeout: Duration::from_secs(2),
            validation_timeout: Duration::from_secs(5),
        }
    }
}

/// All configuration, captured once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Raw variables the settings were parsed from
    pub env: EnvSnapshot,
    /// Pool and retry tunables
    pub pool: PoolConfig,
    /// Environment probing parameters
    pub probe: ProbeSettings,
    /// Directory holding the DDL sources (`DBREADY_DDL_DIR`)
    pub ddl_dir: PathBuf,
}

impl Settings {
    /// Loads the process environment plus `.env` and parses it.
    ///
    /// # Errors
    /// Returns a configuration error if a tunable cannot be parsed.
    pub fn load() -> crate::Result<Self> {
        Self::from_snapshot(EnvSnapshot::load())
    }

    /// Parses settings from an existing snapshot.
    ///
    /// # Errors
    /// Returns a configuration error if a tunable cannot be parsed.
    pub fn from_snapshot(env: EnvSnapshot) -> crate::Result<Self> {
        let pool = PoolConfig::from_snapshot(&env)?;
        let ddl_dir = env
            .get("DBREADY_DDL_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_DDL_DIR), PathBuf::from);

        tracing::debug!(
            "Settings loaded: pool {}..{}, timeout {:?}, {} retry attempts, DDL dir {}",
            pool.min_connections,
            pool.max_connections,
            pool.connect_timeout,
            pool.retry.max_attempts,
            ddl_dir.display()
        );

        Ok(Self {
            env,
            pool,
            probe: ProbeSettings::default(),
            ddl_dir,
        })
    }

    /// Builder method to set the container marker path.
    pub fn with_container_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.probe.container_marker = path.into();
        self
    }

    /// Builder method to set the DDL directory.
    pub fn with_ddl_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ddl_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_snapshot(EnvSnapshot::default()).unwrap();
        assert_eq!(settings.pool, PoolConfig::default());
        assert_eq!(settings.ddl_dir, PathBuf::from(DEFAULT_DDL_DIR));
        assert_eq!(settings.probe.container_marker, PathBuf::from("/.dockerenv"));
        assert_eq!(settings.probe.candidate_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_settings_ddl_dir_override() {
        let env = EnvSnapshot::from_pairs([("DBREADY_DDL_DIR", "/srv/ddl")]);
        let settings = Settings::from_snapshot(env).unwrap();
        assert_eq!(settings.ddl_dir, PathBuf::from("/srv/ddl"));
    }

    #[test]
    fn test_settings_surface_pool_errors() {
        let env = EnvSnapshot::from_pairs([("DB_POOL_MIN", "lots")]);
        assert!(Settings::from_snapshot(env).is_err());
    }
}
