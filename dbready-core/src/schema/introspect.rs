//! Live table introspection from the Postgres catalogs.

use crate::Result;
use crate::error::DbReadyError;
use crate::pool::{ConnectionPool, IsolationLevel};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;

/// Extension trait for extracting typed values from catalog rows with
/// consistent error context.
pub(crate) trait RowExt {
    fn get_field<'r, T>(&'r self, field_name: &str, table_context: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl RowExt for PgRow {
    fn get_field<'r, T>(&'r self, field_name: &str, table_context: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        self.try_get(field_name).map_err(|e| {
            DbReadyError::query_failed(
                format!("Failed to read field '{}' for table '{}'", field_name, table_context),
                e,
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.columns.data_type`, e.g. `timestamp with time zone`
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    /// `PRIMARY KEY`, `UNIQUE`, `FOREIGN KEY`, `CHECK`
    pub kind: String,
}

/// Observed structure of one table in the `public` schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub constraints: Vec<ConstraintInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Source of live table structures.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Returns `Ok(None)` when the table does not exist.
    async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>>;
}

const COLUMNS_QUERY: &str = r#"
    SELECT
        column_name::text AS column_name,
        data_type::text AS data_type,
        is_nullable::text AS is_nullable,
        column_default::text AS column_default,
        character_maximum_length::int4 AS max_length,
        numeric_precision::int4 AS numeric_precision,
        numeric_scale::int4 AS numeric_scale
    FROM information_schema.columns
    WHERE table_name = $1 AND table_schema = 'public'
    ORDER BY ordinal_position
"#;

const INDEXES_QUERY: &str = r#"
    SELECT indexname::text AS indexname, indexdef
    FROM pg_indexes
    WHERE tablename = $1 AND schemaname = 'public'
    ORDER BY indexname
"#;

const CONSTRAINTS_QUERY: &str = r#"
    SELECT constraint_name::text AS constraint_name, constraint_type::text AS constraint_type
    FROM information_schema.table_constraints
    WHERE table_name = $1 AND table_schema = 'public'
    ORDER BY constraint_name
"#;

/// Reads table structures through read-only retried transactions.
#[derive(Debug, Clone)]
pub struct PgSchemaSource {
    pool: ConnectionPool,
}

impl PgSchemaSource {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        let table = table.to_string();
        self.pool
            .execute_with_retry(
                move |conn| {
                    let table = table.clone();
                    Box::pin(async move { collect_table(conn, &table).await })
                },
                IsolationLevel::ReadCommitted,
                true,
            )
            .await
    }
}

async fn collect_table(conn: &mut PgConnection, table: &str) -> Result<Option<TableSchema>> {
    tracing::debug!("Collecting columns for table '{}'", table);
    let rows = sqlx::query(COLUMNS_QUERY)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DbReadyError::query_failed(format!("Failed to query columns for '{}'", table), e))?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let is_nullable: String = row.get_field("is_nullable", table)?;
        columns.push(ColumnInfo {
            name: row.get_field("column_name", table)?,
            data_type: row.get_field("data_type", table)?,
            nullable: is_nullable == "YES",
            default: row.get_field("column_default", table)?,
            max_length: row.get_field("max_length", table)?,
            precision: row.get_field("numeric_precision", table)?,
            scale: row.get_field("numeric_scale", table)?,
        });
    }

    let indexes = sqlx::query(INDEXES_QUERY)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DbReadyError::query_failed(format!("Failed to query indexes for '{}'", table), e))?
        .iter()
        .map(|row| {
            Ok(IndexInfo {
                name: row.get_field("indexname", table)?,
                definition: row.get_field("indexdef", table)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let constraints = sqlx::query(CONSTRAINTS_QUERY)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            DbReadyError::query_failed(format!("Failed to query constraints for '{}'", table), e)
        })?
        .iter()
        .map(|row| {
            Ok(ConstraintInfo {
                name: row.get_field("constraint_name", table)?,
                kind: row.get_field("constraint_type", table)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        "Table '{}': {} columns, {} indexes, {} constraints",
        table,
        columns.len(),
        indexes.len(),
        constraints.len()
    );

    Ok(Some(TableSchema {
        name: table.to_string(),
        columns,
        indexes,
        constraints,
    }))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory schema source.
    #[derive(Debug, Default)]
    pub struct StaticSchemaSource {
        tables: BTreeMap<String, TableSchema>,
        fail_with: Option<String>,
    }

    impl StaticSchemaSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a table from `(column, data_type)` pairs.
        pub fn with_table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
            let columns = columns
                .iter()
                .map(|(column, data_type)| ColumnInfo {
                    name: column.to_string(),
                    data_type: data_type.to_string(),
                    nullable: true,
                    default: None,
                    max_length: None,
                    precision: None,
                    scale: None,
                })
                .collect();
            self.tables.insert(
                name.to_string(),
                TableSchema {
                    name: name.to_string(),
                    columns,
                    indexes: Vec::new(),
                    constraints: Vec::new(),
                },
            );
            self
        }

        pub fn failing(mut self, message: &str) -> Self {
            self.fail_with = Some(message.to_string());
            self
        }
    }

    #[async_trait]
    impl SchemaSource for StaticSchemaSource {
        async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
            if let Some(message) = &self.fail_with {
                return Err(DbReadyError::query_failed(
                    message.clone(),
                    std::io::Error::other(message.clone()),
                ));
            }
            Ok(self.tables.get(table).cloned())
        }
    }
}
