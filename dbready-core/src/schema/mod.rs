//! Table compatibility validation for the ETL platforms.
//!
//! Live structures come from a [`SchemaSource`] (normally
//! [`PgSchemaSource`]) and are compared with the static
//! [`registry::REQUIREMENTS`].

pub mod introspect;
pub mod registry;
pub mod rules;
pub mod types;
pub mod validator;

pub use introspect::{ColumnInfo, ConstraintInfo, IndexInfo, PgSchemaSource, SchemaSource, TableSchema};
pub use registry::{REQUIREMENTS, TableRequirement};
pub use rules::BusinessRule;
pub use types::{TypeFamily, types_compatible};
pub use validator::{
    IssueCategory, SchemaValidator, Severity, TypeMismatch, ValidationIssue, ValidationReport,
};
