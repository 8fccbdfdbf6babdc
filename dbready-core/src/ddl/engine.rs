//! Best-effort DDL application.
//!
//! The statements of a source run in order on one session, each under
//! autocommit. Server failures are classified and recorded, and execution
//! moves on to the next statement; a batch is successful when nothing failed
//! outside the benign categories. Failures that never reached the server
//! are never classified as benign.

use super::catalog::{DdlCatalog, DdlUnit, Layer};
use super::classify::{BenignKind, classify_failure};
use super::clean::clean_ddl;
use super::splitter::{DdlStatement, split_statements};
use crate::Result;
use crate::error::DbReadyError;
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::Postgres;
use std::sync::Arc;
use std::time::Instant;

/// Where a [`StatementError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The server rejected the statement
    Server,
    /// The statement never got a server verdict (connect, I/O or pool failure)
    Connection,
}

/// Failure reported by a [`StatementSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    pub origin: ErrorOrigin,
    /// SQLSTATE, when the server reported one
    pub sqlstate: Option<String>,
    pub message: String,
}

impl StatementError {
    pub fn server(sqlstate: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            origin: ErrorOrigin::Server,
            sqlstate: sqlstate.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            origin: ErrorOrigin::Connection,
            sqlstate: None,
            message: message.into(),
        }
    }

    pub fn is_server(&self) -> bool {
        self.origin == ErrorOrigin::Server
    }
}

impl From<sqlx::Error> for StatementError {
    fn from(error: sqlx::Error) -> Self {
        match error.as_database_error() {
            Some(db) => {
                let sqlstate = db.code().map(|code| code.into_owned());
                Self {
                    origin: ErrorOrigin::Server,
                    sqlstate,
                    message: error.to_string(),
                }
            }
            None => Self::connection(error.to_string()),
        }
    }
}

impl From<DbReadyError> for StatementError {
    fn from(error: DbReadyError) -> Self {
        Self::connection(error.to_string())
    }
}

/// Opens sessions that statements of one batch run on.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn open_session(&self) -> std::result::Result<Box<dyn StatementSession>, StatementError>;
}

/// One database session. Statements run in order on the same connection.
#[async_trait]
pub trait StatementSession: Send {
    /// Runs one SQL statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> std::result::Result<u64, StatementError>;
}

/// Executes statements on a pooled connection through the simple query
/// protocol, outside any explicit transaction.
#[derive(Debug, Clone)]
pub struct PgStatementExecutor {
    pool: ConnectionPool,
}

impl PgStatementExecutor {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementExecutor for PgStatementExecutor {
    async fn open_session(&self) -> std::result::Result<Box<dyn StatementSession>, StatementError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// Session holding one pooled connection until dropped.
struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl StatementSession for PgSession {
    async fn execute(&mut self, sql: &str) -> std::result::Result<u64, StatementError> {
        let conn: &mut sqlx::PgConnection = &mut self.conn;
        let result = sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }
}

/// What happened to one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatementOutcome {
    Applied { rows_affected: u64 },
    SkippedBenign { kind: BenignKind, message: String },
    Failed { reason: String },
}

impl StatementOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One statement of a batch and its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct StatementReport {
    pub index: usize,
    pub preview: String,
    #[serde(flatten)]
    pub outcome: StatementOutcome,
}

/// Aggregate result of applying one DDL source.
#[derive(Debug, Clone, Serialize)]
pub struct DdlBatchResult {
    pub source_id: String,
    pub platform: Option<String>,
    pub layer: Option<Layer>,
    /// No statement ended in `Failed`
    pub success: bool,
    pub statements: Vec<StatementReport>,
    pub rows_affected: u64,
    pub elapsed_ms: u128,
    pub started_at: DateTime<Utc>,
    /// Set when no session could be opened; statements after that point
    /// were not attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl DdlBatchResult {
    pub fn applied_count(&self) -> usize {
        self.count(|o| matches!(o, StatementOutcome::Applied { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, StatementOutcome::SkippedBenign { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(StatementOutcome::is_failed)
    }

    /// Messages of the failed statements, and of the connection failure
    /// if one stopped the batch.
    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .statements
            .iter()
            .filter_map(|s| match &s.outcome {
                StatementOutcome::Failed { reason } => {
                    Some(format!("Statement {} failed in {}: {}", s.index, self.source_id, reason))
                }
                _ => None,
            })
            .collect();
        if let Some(error) = &self.connection_error {
            errors.push(format!("Could not open a session for {}: {}", self.source_id, error));
        }
        errors
    }

    fn count(&self, predicate: impl Fn(&StatementOutcome) -> bool) -> usize {
        self.statements.iter().filter(|s| predicate(&s.outcome)).count()
    }
}

/// Applies DDL sources statement by statement.
#[derive(Clone)]
pub struct DdlEngine {
    executor: Arc<dyn StatementExecutor>,
    catalog: Option<DdlCatalog>,
}

impl std::fmt::Debug for DdlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdlEngine")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl DdlEngine {
    pub fn new(executor: Arc<dyn StatementExecutor>) -> Self {
        Self {
            executor,
            catalog: None,
        }
    }

    /// Engine executing against `pool`.
    pub fn for_pool(pool: ConnectionPool) -> Self {
        Self::new(Arc::new(PgStatementExecutor::new(pool)))
    }

    /// Builder method to attach a catalog.
    pub fn with_catalog(mut self, catalog: DdlCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn catalog(&self) -> Option<&DdlCatalog> {
        self.catalog.as_ref()
    }

    /// Cleans, splits and applies ad-hoc DDL text.
    pub async fn execute_ddl(&self, source_id: &str, text: &str) -> DdlBatchResult {
        let cleaned = clean_ddl(text);
        self.run(source_id, None, None, &cleaned).await
    }

    /// Applies one catalog unit. Its text is already cleaned.
    pub async fn execute_unit(&self, unit: &DdlUnit) -> DdlBatchResult {
        self.run(&unit.id, Some(unit.platform.clone()), Some(unit.layer), &unit.text)
            .await
    }

    /// Applies every active unit of the catalog in execution order.
    ///
    /// # Errors
    /// Returns a configuration error when no catalog is attached.
    pub async fn apply_all(&self) -> Result<Vec<DdlBatchResult>> {
        let plan = self.require_catalog()?.execution_plan()?;
        Ok(self.run_plan(plan).await)
    }

    /// Applies the units relevant to `platforms`, generic units included.
    ///
    /// # Errors
    /// Returns a configuration error when no catalog is attached.
    pub async fn apply_for_platforms(&self, platforms: &[String]) -> Result<Vec<DdlBatchResult>> {
        let plan = self.require_catalog()?.plan_for_platforms(platforms)?;
        Ok(self.run_plan(plan).await)
    }

    fn require_catalog(&self) -> Result<&DdlCatalog> {
        self.catalog
            .as_ref()
            .ok_or_else(|| DbReadyError::configuration("No DDL catalog configured"))
    }

    async fn run_plan(&self, plan: Vec<&DdlUnit>) -> Vec<DdlBatchResult> {
        let mut results = Vec::with_capacity(plan.len());
        for unit in plan {
            results.push(self.execute_unit(unit).await);
        }
        results
    }

    async fn run(
        &self,
        source_id: &str,
        platform: Option<String>,
        layer: Option<Layer>,
        text: &str,
    ) -> DdlBatchResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let statements = split_statements(text);
        let total = statements.len();
        tracing::info!("Processing {} SQL statements from {}", total, source_id);

        let mut reports = Vec::with_capacity(total);
        let mut rows_affected = 0u64;
        let mut session: Option<Box<dyn StatementSession>> = None;
        let mut connection_error = None;

        for statement in statements {
            if session.is_none() {
                match self.executor.open_session().await {
                    Ok(opened) => session = Some(opened),
                    Err(error) => {
                        tracing::error!(
                            "Could not open a session for {} at statement {}/{}: {}",
                            source_id,
                            statement.index,
                            total,
                            error.message
                        );
                        connection_error = Some(error.message);
                        break;
                    }
                }
            }
            let Some(active) = session.as_mut() else {
                break;
            };

            let (outcome, lost_connection) = apply_statement(active.as_mut(), source_id, total, &statement).await;
            if lost_connection {
                // Reconnect before the next statement
                session = None;
            }
            if let StatementOutcome::Applied { rows_affected: rows } = &outcome {
                rows_affected = rows_affected.saturating_add(*rows);
            }
            reports.push(StatementReport {
                index: statement.index,
                preview: statement.preview(),
                outcome,
            });
        }

        let result = DdlBatchResult {
            source_id: source_id.to_string(),
            platform,
            layer,
            success: connection_error.is_none() && !reports.iter().any(|r| r.outcome.is_failed()),
            statements: reports,
            rows_affected,
            elapsed_ms: start.elapsed().as_millis(),
            started_at,
            connection_error,
        };

        tracing::info!(
            "{}: {} applied, {} skipped, {} failed",
            source_id,
            result.applied_count(),
            result.skipped_count(),
            result.failed_count()
        );
        result
    }
}

/// Runs one statement, returning its outcome and whether the session it ran
/// on should be dropped.
async fn apply_statement(
    session: &mut dyn StatementSession,
    source_id: &str,
    total: usize,
    statement: &DdlStatement,
) -> (StatementOutcome, bool) {
    let error = match session.execute(&statement.sql).await {
        Ok(rows_affected) => {
            tracing::debug!("Statement {}/{} executed successfully", statement.index, total);
            return (StatementOutcome::Applied { rows_affected }, false);
        }
        Err(error) => error,
    };

    let benign = if error.is_server() {
        classify_failure(error.sqlstate.as_deref(), &error.message, &statement.sql)
    } else {
        None
    };

    match benign {
        Some(kind) => {
            tracing::warn!(
                "Statement {} in {} skipped ({}): {}",
                statement.index,
                source_id,
                kind,
                error.message
            );
            (
                StatementOutcome::SkippedBenign {
                    kind,
                    message: error.message,
                },
                false,
            )
        }
        None => {
            tracing::error!(
                "Statement {} failed in {}: {}",
                statement.index,
                source_id,
                error.message
            );
            tracing::error!("  Statement preview: {}...", statement.preview());
            let lost_connection = !error.is_server();
            (
                StatementOutcome::Failed {
                    reason: error.message,
                },
                lost_connection,
            )
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedExecutor;
    use super::*;

    #[tokio::test]
    async fn test_benign_failure_does_not_stop_batch() {
        let executor = Arc::new(ScriptedExecutor::new().failing(
            "CREATE TABLE a",
            Some("42P07"),
            "relation \"a\" already exists",
        ));
        let engine = DdlEngine::new(executor.clone());

        let result = engine
            .execute_ddl(
                "steam_ddl_api",
                "CREATE TABLE a (id int);\nCREATE TABLE b (id int);\nINSERT INTO b VALUES (1);",
            )
            .await;

        assert!(result.success);
        assert_eq!(executor.executed().len(), 3);
        assert_eq!(result.statements.len(), 3);
        assert_eq!(
            result.statements[0].outcome,
            StatementOutcome::SkippedBenign {
                kind: BenignKind::AlreadyExists,
                message: "relation \"a\" already exists".to_string(),
            }
        );
        assert_eq!(result.applied_count(), 2);
        assert_eq!(result.rows_affected, 2);
    }

    #[tokio::test]
    async fn test_unclassified_failure_marks_batch_failed_but_continues() {
        let executor = Arc::new(
            ScriptedExecutor::new().failing("GRANT", Some("42501"), "permission denied for schema public"),
        );
        let engine = DdlEngine::new(executor.clone());

        let result = engine
            .execute_ddl("grants_ddl", "GRANT ALL ON SCHEMA public TO etl;\nCREATE TABLE c (id int);")
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.applied_count(), 1);
        assert_eq!(executor.executed().len(), 2);
        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Statement 1 failed in grants_ddl"));
    }

    #[tokio::test]
    async fn test_empty_source_is_successful() {
        let executor = Arc::new(ScriptedExecutor::new().unavailable("connection refused"));
        let engine = DdlEngine::new(executor);
        let result = engine.execute_ddl("empty", "-- nothing here\n").await;
        assert!(result.success);
        assert!(result.statements.is_empty());
        assert!(result.connection_error.is_none());
    }

    #[tokio::test]
    async fn test_batch_runs_on_one_session() {
        let executor = Arc::new(ScriptedExecutor::new().failing(
            "CREATE TABLE a",
            Some("42P07"),
            "relation \"a\" already exists",
        ));
        let engine = DdlEngine::new(executor.clone());

        let result = engine
            .execute_ddl(
                "session_ddl",
                "SET search_path TO staging;\nCREATE TABLE a (id int);\nCREATE TABLE b (id int);",
            )
            .await;

        assert!(result.success);
        assert_eq!(executor.executed().len(), 3);
        assert_eq!(executor.sessions(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_never_benign() {
        // The statement is idempotent, so a server error here would be benign
        let executor = Arc::new(
            ScriptedExecutor::new().failing_connection("CREATE TABLE IF NOT EXISTS a", "connection reset by peer"),
        );
        let engine = DdlEngine::new(executor.clone());

        let result = engine
            .execute_ddl(
                "reset_ddl",
                "CREATE TABLE IF NOT EXISTS a (id int);\nCREATE TABLE IF NOT EXISTS b (id int);",
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.skipped_count(), 0);
        assert_eq!(
            result.statements[0].outcome,
            StatementOutcome::Failed {
                reason: "connection reset by peer".to_string(),
            }
        );
        assert_eq!(result.applied_count(), 1);
        // The broken session is replaced before the next statement
        assert_eq!(executor.sessions(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_database_fails_batch() {
        let executor = Arc::new(ScriptedExecutor::new().unavailable("pool timed out while waiting for an open connection"));
        let engine = DdlEngine::new(executor.clone());

        let result = engine
            .execute_ddl(
                "steam_ddl_api",
                "CREATE TABLE IF NOT EXISTS a (id int);\nCREATE INDEX IF NOT EXISTS a_idx ON a (id);",
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.skipped_count(), 0);
        assert!(result.statements.is_empty());
        assert!(executor.executed().is_empty());
        assert_eq!(
            result.connection_error.as_deref(),
            Some("pool timed out while waiting for an open connection")
        );
        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Could not open a session for steam_ddl_api"));
    }

    #[tokio::test]
    async fn test_unreachable_pool_reports_connection_error() {
        use crate::config::{ConnectionConfig, PoolConfig};
        use crate::environment::EnvironmentKind;
        use std::time::Duration;

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut connection = ConnectionConfig::with_defaults("127.0.0.1", EnvironmentKind::LocalHost);
        connection.port = port;
        let pool_config = PoolConfig {
            connect_timeout: Duration::from_millis(300),
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::connect_lazy(&connection, pool_config).unwrap();
        let engine = DdlEngine::for_pool(pool);

        let result = engine
            .execute_ddl("steam_ddl_api", "CREATE TABLE IF NOT EXISTS a (id int);")
            .await;

        assert!(!result.success);
        assert_eq!(result.skipped_count(), 0);
        assert!(result.connection_error.is_some());
    }

    #[test]
    fn test_sqlx_errors_without_server_verdict_are_connection_errors() {
        let error = StatementError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(error.origin, ErrorOrigin::Connection);
        assert!(error.sqlstate.is_none());
    }

    #[tokio::test]
    async fn test_apply_requires_catalog() {
        let engine = DdlEngine::new(Arc::new(ScriptedExecutor::new()));
        assert!(matches!(
            engine.apply_all().await,
            Err(DbReadyError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_for_platforms_runs_in_plan_order() {
        let catalog = DdlCatalog::from_units([
            DdlUnit::parse("l1_steam_ddl", "-- dbready:after steam_ddl_api\nCREATE TABLE l1 (id int);").unwrap(),
            DdlUnit::parse("steam_ddl_api", "-- dbready:order 0\nCREATE TABLE api (id int);").unwrap(),
            DdlUnit::parse("l0_sony_ddl", "CREATE TABLE sony (id int);").unwrap(),
        ])
        .unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = DdlEngine::new(executor.clone()).with_catalog(catalog);

        let results = engine.apply_for_platforms(&["steam".to_string()]).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "steam_ddl_api");
        assert_eq!(results[0].platform.as_deref(), Some("steam"));
        assert_eq!(results[1].layer, Some(Layer::L1));
        assert_eq!(
            executor.executed(),
            vec!["CREATE TABLE api (id int);", "CREATE TABLE l1 (id int);"]
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let report = StatementReport {
            index: 2,
            preview: "VACUUM t".to_string(),
            outcome: StatementOutcome::SkippedBenign {
                kind: BenignKind::VacuumInTransaction,
                message: "cannot run".to_string(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "skipped_benign");
        assert_eq!(json["kind"], "vacuum_in_transaction");
        assert_eq!(json["index"], 2);
    }
}
