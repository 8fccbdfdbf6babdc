//! Database readiness checks for ETL pipelines.
//!
//! This crate resolves a Postgres connection for whatever environment the
//! pipeline runs in, pools and retries connections, applies DDL sources
//! statement by statement, and validates live tables against the platform
//! requirement registry.
//!
//! # Guarantees
//! - Resolution always yields a config; unreachable hosts are reported, not raised
//! - A DDL batch always runs to the end and reports every statement outcome
//! - Passwords are masked in `Debug`, `Display`, serialized output and logs
//! - Configuration is read once into an immutable [`config::Settings`]
//!
//! # Example
//! ```rust,no_run
//! use dbready_core::config::Settings;
//! use dbready_core::orchestrator::ValidationOrchestrator;
//!
//! # async fn example() -> dbready_core::Result<()> {
//! let orchestrator = ValidationOrchestrator::new(Settings::load()?);
//! let result = orchestrator.validate_full_stack(&[], false).await?;
//! if result.ready {
//!     println!("using {}", result.config_used);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ddl;
pub mod environment;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pool;
pub mod resolver;
pub mod schema;

// Re-export commonly used types
pub use config::{ConnectionConfig, ConnectionOverrides, PoolConfig, RetryPolicy, Settings};
pub use ddl::{DdlBatchResult, DdlCatalog, DdlEngine, StatementOutcome};
pub use environment::EnvironmentKind;
pub use error::{DbReadyError, Result};
pub use orchestrator::{HealthSummary, ReadinessResult, ValidationOrchestrator};
pub use pool::{ConnectionHealth, ConnectionPool, IsolationLevel};
pub use resolver::ConnectionConfigResolver;
pub use schema::{SchemaValidator, ValidationReport};
