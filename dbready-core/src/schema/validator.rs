//! Schema compatibility checks against the requirement registry.

use super::introspect::{SchemaSource, TableSchema};
use super::registry::{self, TableRequirement};
use super::types::types_compatible;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Weight of required-column coverage in the compatibility score
const COLUMN_WEIGHT: f64 = 0.7;
/// Weight of type agreement in the compatibility score
const TYPE_WEIGHT: f64 = 0.3;
/// Score lost per type mismatch, floored at zero
const TYPE_MISMATCH_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Compatibility,
    Existence,
    MissingColumn,
    MissingOptionalColumn,
    ExtraColumn,
    TypeMismatch,
    BusinessRule,
    SystemError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub message: String,
    pub table: String,
    pub column: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        category: IssueCategory,
        message: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            table: table.into(),
            column: None,
            expected: None,
            actual: None,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_values(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMismatch {
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of checking one table.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub table: String,
    pub platform: String,
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    /// In `[0, 1]`
    pub compatibility_score: f64,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub type_mismatches: Vec<TypeMismatch>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    fn new(table: &str, platform: &str) -> Self {
        Self {
            table: table.to_string(),
            platform: platform.to_string(),
            valid: true,
            issues: Vec::new(),
            compatibility_score: 1.0,
            missing_columns: Vec::new(),
            extra_columns: Vec::new(),
            type_mismatches: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// Whether applying the platform's DDL could fix this table: it is
    /// missing, lacks required columns or could not be checked.
    pub fn repair_needed(&self) -> bool {
        !self.valid || !self.missing_columns.is_empty()
    }

    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn has_critical(&self) -> bool {
        self.issues_with(Severity::Critical).next().is_some()
    }
}

/// Compares live tables with their registered requirements.
#[derive(Clone)]
pub struct SchemaValidator {
    source: Arc<dyn SchemaSource>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self { source }
    }

    /// Checks `platform.table` against the registry.
    ///
    /// Never fails: introspection errors become a critical `system_error`
    /// issue on an invalid report.
    pub async fn check_compatibility(&self, table: &str, platform: &str) -> ValidationReport {
        let mut report = ValidationReport::new(table, platform);

        let Some(requirement) = registry::requirement(platform, table) else {
            report.issues.push(ValidationIssue::new(
                Severity::Warning,
                IssueCategory::Compatibility,
                format!("No compatibility requirements defined for {}.{}", platform, table),
                table,
            ));
            return report;
        };

        match self.source.table_schema(table).await {
            Ok(Some(schema)) => evaluate(requirement, &schema, &mut report),
            Ok(None) => {
                report.issues.push(ValidationIssue::new(
                    Severity::Critical,
                    IssueCategory::Existence,
                    format!("Table {} does not exist", table),
                    table,
                ));
                report.valid = false;
                report.compatibility_score = 0.0;
                report.missing_columns = requirement.required.iter().map(|c| c.to_string()).collect();
            }
            Err(e) => {
                tracing::error!("Compatibility check failed for {}: {}", table, e);
                report.issues.push(ValidationIssue::new(
                    Severity::Critical,
                    IssueCategory::SystemError,
                    format!("Validation failed: {}", e),
                    table,
                ));
                report.valid = false;
                report.compatibility_score = 0.0;
            }
        }

        report
    }

    /// Checks every registered table of each platform, keyed
    /// `platform.table`. An empty list means every registered platform.
    pub async fn validate_all(&self, platforms: &[String]) -> BTreeMap<String, ValidationReport> {
        let platforms: Vec<String> = if platforms.is_empty() {
            registry::platforms().into_iter().map(str::to_string).collect()
        } else {
            platforms.to_vec()
        };

        let mut results = BTreeMap::new();
        for platform in &platforms {
            for requirement in registry::tables_for(platform) {
                let report = self.check_compatibility(requirement.table, platform).await;
                if report.valid {
                    tracing::info!(
                        "{} ({}): compatible (score: {:.2})",
                        requirement.table,
                        platform,
                        report.compatibility_score
                    );
                } else {
                    tracing::warn!(
                        "{} ({}): issues found (score: {:.2})",
                        requirement.table,
                        platform,
                        report.compatibility_score
                    );
                }
                results.insert(requirement.key(), report);
            }
        }
        results
    }
}

fn evaluate(requirement: &TableRequirement, schema: &TableSchema, report: &mut ValidationReport) {
    let table = schema.name.as_str();
    let actual: BTreeSet<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();

    for column in requirement.required {
        if !actual.contains(column) {
            report.missing_columns.push(column.to_string());
            report.issues.push(
                ValidationIssue::new(
                    Severity::Error,
                    IssueCategory::MissingColumn,
                    format!("Required column '{}' is missing", column),
                    table,
                )
                .with_column(*column),
            );
        }
    }

    for column in requirement.optional {
        if !actual.contains(column) {
            report.issues.push(
                ValidationIssue::new(
                    Severity::Info,
                    IssueCategory::MissingOptionalColumn,
                    format!("Optional column '{}' is missing", column),
                    table,
                )
                .with_column(*column),
            );
        }
    }

    for column in &schema.columns {
        if !requirement.is_known_column(&column.name) {
            report.extra_columns.push(column.name.clone());
            report.issues.push(
                ValidationIssue::new(
                    Severity::Warning,
                    IssueCategory::ExtraColumn,
                    format!("Unexpected column '{}' found", column.name),
                    table,
                )
                .with_column(column.name.as_str()),
            );
        }
    }

    for (column, expected) in requirement.column_types {
        let Some(info) = schema.column(column) else {
            continue;
        };
        if !types_compatible(expected, &info.data_type) {
            report.type_mismatches.push(TypeMismatch {
                column: column.to_string(),
                expected: expected.to_string(),
                actual: info.data_type.clone(),
            });
            report.issues.push(
                ValidationIssue::new(
                    Severity::Error,
                    IssueCategory::TypeMismatch,
                    format!("Column '{}' type mismatch", column),
                    table,
                )
                .with_column(*column)
                .with_values(*expected, info.data_type.as_str()),
            );
        }
    }

    report.compatibility_score = compatibility_score(
        requirement.required.len(),
        report.missing_columns.len(),
        report.type_mismatches.len(),
    );

    for rule in requirement.rules {
        report.issues.extend(rule.evaluate(schema));
    }

    report.valid = !report.has_critical() && report.missing_columns.is_empty();
}

/// `0.7 x` required coverage `+ 0.3 x` type agreement; `1.0` without
/// required columns.
fn compatibility_score(required_total: usize, missing_required: usize, type_mismatches: usize) -> f64 {
    if required_total == 0 {
        return 1.0;
    }
    let present = required_total.saturating_sub(missing_required) as f64;
    let column_score = present / required_total as f64;
    let type_score = (1.0 - TYPE_MISMATCH_PENALTY * type_mismatches as f64).max(0.0);
    COLUMN_WEIGHT * column_score + TYPE_WEIGHT * type_score
}
