//! Business rules attached to table requirements.

use super::introspect::TableSchema;
use super::validator::{IssueCategory, Severity, ValidationIssue};
use serde::Serialize;

/// Rule checked against a table's observed structure.
///
/// Only structural facts are verified; rules about stored values can not be
/// confirmed without inspecting data and are reported as informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BusinessRule {
    /// `column` must exist and should be `jsonb`; objects stored in it
    /// carry `fields`
    JsonPayload {
        column: &'static str,
        fields: &'static [&'static str],
    },
    /// Values of `column` follow a naming pattern such as `steam_batch_*`
    ValuePattern {
        column: &'static str,
        pattern: &'static str,
    },
    /// Rows are expected to carry `value` in `column`
    ExpectedValue {
        column: &'static str,
        value: &'static str,
    },
}

impl std::fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JsonPayload { column, fields } => {
                write!(f, "{} must contain {} fields", column, fields.join(", "))
            }
            Self::ValuePattern { column, pattern } => {
                write!(f, "{} should follow {} pattern", column, pattern)
            }
            Self::ExpectedValue { column, value } => write!(f, "{} should be '{}'", column, value),
        }
    }
}

impl BusinessRule {
    /// Checks the rule against `schema`, returning any issues found.
    pub fn evaluate(&self, schema: &TableSchema) -> Vec<ValidationIssue> {
        let table = schema.name.as_str();
        match *self {
            Self::JsonPayload { column, .. } => match schema.column(column) {
                None => vec![
                    ValidationIssue::new(
                        Severity::Error,
                        IssueCategory::BusinessRule,
                        format!("Business rule violation: {}", self),
                        table,
                    )
                    .with_column(column),
                ],
                Some(info) if info.data_type != "jsonb" => vec![
                    ValidationIssue::new(
                        Severity::Warning,
                        IssueCategory::BusinessRule,
                        format!("{} column should be JSONB for rule: {}", column, self),
                        table,
                    )
                    .with_column(column)
                    .with_values("jsonb", &info.data_type),
                ],
                Some(_) => Vec::new(),
            },
            Self::ValuePattern { .. } => vec![ValidationIssue::new(
                Severity::Info,
                IssueCategory::BusinessRule,
                format!("Pattern rule requires data validation: {}", self),
                table,
            )],
            Self::ExpectedValue { column, value } => {
                let mut issue = ValidationIssue::new(
                    Severity::Info,
                    IssueCategory::BusinessRule,
                    format!("Default value rule for {}: {}", column, value),
                    table,
                )
                .with_column(column);
                issue.expected = Some(value.to_string());
                vec![issue]
            }
        }
    }
}
