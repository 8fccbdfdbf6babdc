//! Full-stack readiness: connection, schema and optional DDL repair.
//!
//! [`ValidationOrchestrator`] is built once from [`Settings`] and owns every
//! component it needs, so nothing is shared through globals.

use crate::Result;
use crate::config::{ConnectionConfig, ConnectionOverrides, Settings};
use crate::ddl::{DdlBatchResult, DdlCatalog, DdlEngine, PgStatementExecutor, StatementExecutor};
use crate::environment::{EnvironmentKind, Probe};
use crate::pool::{ConnectionHealth, ConnectionPool};
use crate::resolver::{ConnectionConfigResolver, ConnectionValidation, ResolverDiagnostics};
use crate::schema::{PgSchemaSource, SchemaSource, SchemaValidator, ValidationReport, registry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of [`ValidationOrchestrator::validate_full_stack`].
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResult {
    pub connection_valid: bool,
    pub connection_message: String,
    pub schema_valid: bool,
    /// Keyed `platform.table`
    pub schema_results: BTreeMap<String, ValidationReport>,
    pub config_used: ConnectionConfig,
    /// Batches applied by auto-repair, in execution order
    pub repair_results: Vec<DdlBatchResult>,
    /// Set when repair was needed and requested but could not run
    pub repair_skipped: Option<String>,
    /// `connection_valid && schema_valid`
    pub ready: bool,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessResult {
    fn new(validation: ConnectionValidation, config: ConnectionConfig) -> Self {
        Self {
            connection_valid: validation.valid,
            connection_message: validation.message,
            schema_valid: false,
            schema_results: BTreeMap::new(),
            config_used: config,
            repair_results: Vec::new(),
            repair_skipped: None,
            ready: false,
            checked_at: Utc::now(),
        }
    }

    /// Whether any table is invalid or could be fixed by applying DDL.
    pub fn needs_repair(&self) -> bool {
        self.schema_results.values().any(|r| !r.valid || r.repair_needed())
    }
}

/// Where the health check connected.
#[derive(Debug, Clone, Serialize)]
pub struct HealthTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub environment: EnvironmentKind,
}

/// Condensed readiness for health endpoints and scripts.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub healthy: bool,
    pub connection_valid: bool,
    pub schema_valid: bool,
    pub validation_results: BTreeMap<String, ValidationReport>,
    pub config_used: HealthTarget,
    /// Pool probe, present when the connection validated
    pub pool: Option<ConnectionHealth>,
}

/// Resolver diagnostics combined with a non-repairing readiness run.
#[derive(Debug, Clone, Serialize)]
pub struct StackDiagnostics {
    #[serde(flatten)]
    pub resolver: ResolverDiagnostics,
    pub readiness: ReadinessResult,
    /// `READY` or `NEEDS_ATTENTION`
    pub overall_status: &'static str,
}

/// Validates that the database is ready for ETL work.
#[derive(Debug, Clone)]
pub struct ValidationOrchestrator {
    settings: Settings,
    resolver: ConnectionConfigResolver,
    overrides: ConnectionOverrides,
    catalog: Option<DdlCatalog>,
}

impl ValidationOrchestrator {
    pub fn new(settings: Settings) -> Self {
        let resolver = ConnectionConfigResolver::new(&settings);
        Self::from_parts(settings, resolver)
    }

    /// Orchestrator whose resolver uses `probe` for network checks.
    pub fn with_probe(settings: Settings, probe: Arc<dyn Probe>) -> Self {
        let resolver = ConnectionConfigResolver::with_probe(&settings, probe);
        Self::from_parts(settings, resolver)
    }

    fn from_parts(settings: Settings, resolver: ConnectionConfigResolver) -> Self {
        Self {
            settings,
            resolver,
            overrides: ConnectionOverrides::default(),
            catalog: None,
        }
    }

    /// Builder method to override resolved connection fields.
    pub fn with_overrides(mut self, overrides: ConnectionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Builder method to enable auto-repair from `catalog`.
    pub fn with_catalog(mut self, catalog: DdlCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &ConnectionConfigResolver {
        &self.resolver
    }

    /// Resolved config with overrides applied.
    pub async fn connection_config(&self) -> ConnectionConfig {
        let config = self.resolver.resolve().await;
        if self.overrides.is_empty() {
            config
        } else {
            config.with_overrides(&self.overrides)
        }
    }

    /// Resolves and validates the connection.
    pub async fn validate_connection(&self) -> (ConnectionValidation, ConnectionConfig) {
        let config = self.connection_config().await;
        let validation = self.resolver.validate_connection(&config).await;
        (validation, config)
    }

    /// Connection and schema validation with optional repair.
    ///
    /// An empty `platforms` list means every registered platform.
    ///
    /// # Errors
    /// Returns an error only when the pool cannot be configured or a DDL
    /// plan cannot be built; connectivity and schema problems are reported
    /// in the result.
    pub async fn validate_full_stack(&self, platforms: &[String], auto_repair: bool) -> Result<ReadinessResult> {
        let (result, pool) = self.run(platforms, auto_repair).await?;
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(result)
    }

    /// Health summary from a non-repairing full-stack run.
    ///
    /// # Errors
    /// Same conditions as [`Self::validate_full_stack`].
    pub async fn check_health(&self) -> Result<HealthSummary> {
        tracing::info!("Starting database health check");
        let (result, pool) = self.run(&[], false).await?;

        let pool_health = match pool {
            Some(pool) => {
                let health = pool.health_check().await;
                pool.close().await;
                Some(health)
            }
            None => None,
        };

        let summary = HealthSummary {
            healthy: result.ready,
            connection_valid: result.connection_valid,
            schema_valid: result.schema_valid,
            config_used: HealthTarget {
                host: result.config_used.host.clone(),
                port: result.config_used.port,
                database: result.config_used.database.clone(),
                environment: result.config_used.environment,
            },
            validation_results: result.schema_results,
            pool: pool_health,
        };
        tracing::info!("Database health check complete - healthy: {}", summary.healthy);
        Ok(summary)
    }

    /// Resolver diagnostics plus schema status.
    ///
    /// # Errors
    /// Same conditions as [`Self::validate_full_stack`].
    pub async fn diagnostics(&self) -> Result<StackDiagnostics> {
        let resolver = self.resolver.diagnostics().await;
        let readiness = self.validate_full_stack(&[], false).await?;
        let overall_status = if readiness.ready { "READY" } else { "NEEDS_ATTENTION" };
        Ok(StackDiagnostics {
            resolver,
            readiness,
            overall_status,
        })
    }

    async fn run(&self, platforms: &[String], auto_repair: bool) -> Result<(ReadinessResult, Option<ConnectionPool>)> {
        tracing::info!("Starting full database stack validation");

        let (validation, config) = self.validate_connection().await;
        let mut result = ReadinessResult::new(validation, config);

        if !result.connection_valid {
            tracing::error!("Connection validation failed: {}", result.connection_message);
            return Ok((result, None));
        }
        tracing::info!("Database connection validated: {}", result.connection_message);

        let platforms = resolve_platforms(platforms);
        let pool = ConnectionPool::connect_lazy(&result.config_used, self.settings.pool.clone())?;
        self.check_schema(
            &mut result,
            &platforms,
            auto_repair,
            Arc::new(PgSchemaSource::new(pool.clone())),
            Arc::new(PgStatementExecutor::new(pool.clone())),
        )
        .await?;

        Ok((result, Some(pool)))
    }

    /// Validates `platforms` through `source`, applying catalog DDL through
    /// `executor` and re-validating when repair is needed and allowed.
    async fn check_schema(
        &self,
        result: &mut ReadinessResult,
        platforms: &[String],
        auto_repair: bool,
        source: Arc<dyn SchemaSource>,
        executor: Arc<dyn StatementExecutor>,
    ) -> Result<()> {
        let validator = SchemaValidator::new(source);
        result.schema_results = validator.validate_all(platforms).await;

        if result.needs_repair() && auto_repair {
            match &self.catalog {
                Some(catalog) => {
                    tracing::info!("Schema issues detected, attempting auto-repair");
                    let engine = DdlEngine::new(executor).with_catalog(catalog.clone());
                    result.repair_results = engine.apply_for_platforms(platforms).await?;
                    result.schema_results = validator.validate_all(platforms).await;
                }
                None => {
                    let reason = "Auto-repair requested but no DDL catalog is configured".to_string();
                    tracing::warn!("{}", reason);
                    result.repair_skipped = Some(reason);
                }
            }
        }

        result.schema_valid = result.schema_results.values().all(|r| r.valid);
        result.ready = result.connection_valid && result.schema_valid;
        tracing::info!("Full stack validation complete - ready for ETL: {}", result.ready);
        Ok(())
    }
}

fn resolve_platforms(platforms: &[String]) -> Vec<String> {
    if platforms.is_empty() {
        registry::platforms().into_iter().map(str::to_string).collect()
    } else {
        platforms.to_vec()
    }
}
