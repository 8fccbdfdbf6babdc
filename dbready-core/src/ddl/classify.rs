//! Classification of failed DDL statements.

use serde::Serialize;

/// Failure categories that do not count against a batch.
///
/// DDL sources are re-applied against databases in any state, so these
/// typically mean "already done" or "not applicable here".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenignKind {
    /// The object being created already exists
    AlreadyExists,
    /// A referenced relation does not exist yet
    MissingDependency,
    /// An `IF NOT EXISTS` statement failed anyway
    IdempotentConflict,
    /// Duplicate object, key or constraint
    DuplicateObject,
    /// `VACUUM` and friends refuse to run in a transaction block
    VacuumInTransaction,
    /// Syntax errors, mostly from bodies the splitter could not keep whole
    NestedBodySyntax,
    /// Follow-on failure of an earlier error in the same transaction
    AbortedTransaction,
}

impl std::fmt::Display for BenignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            Self::AlreadyExists => "object already exists",
            Self::MissingDependency => "relation dependency missing",
            Self::IdempotentConflict => "idempotent operation failed",
            Self::DuplicateObject => "duplicate object",
            Self::VacuumInTransaction => "cannot run inside a transaction block",
            Self::NestedBodySyntax => "syntax issue (likely function or DO block)",
            Self::AbortedTransaction => "transaction aborted by previous error",
        };
        f.write_str(description)
    }
}

/// Maps server SQLSTATE codes onto benign categories.
fn from_sqlstate(code: &str) -> Option<BenignKind> {
    let kind = match code {
        // duplicate_table, duplicate_object, duplicate_column,
        // duplicate_schema, duplicate_function
        "42P07" | "42710" | "42701" | "42P06" | "42723" => BenignKind::AlreadyExists,
        // undefined_table
        "42P01" => BenignKind::MissingDependency,
        // active_sql_transaction
        "25001" => BenignKind::VacuumInTransaction,
        // syntax_error
        "42601" => BenignKind::NestedBodySyntax,
        // in_failed_sql_transaction
        "25P02" => BenignKind::AbortedTransaction,
        _ => return None,
    };
    Some(kind)
}

/// Classifies a failed statement, or returns `None` for a real failure.
///
/// The SQLSTATE is consulted first; message heuristics cover drivers or
/// wrappers that do not expose one.
pub fn classify_failure(sqlstate: Option<&str>, message: &str, statement: &str) -> Option<BenignKind> {
    if let Some(kind) = sqlstate.and_then(from_sqlstate) {
        return Some(kind);
    }

    let message = message.to_lowercase();

    if message.contains("does not exist") && message.contains("relation") {
        Some(BenignKind::MissingDependency)
    } else if message.contains("already exists") {
        Some(BenignKind::AlreadyExists)
    } else if statement.to_lowercase().contains("if not exists") {
        Some(BenignKind::IdempotentConflict)
    } else if message.contains("duplicate") {
        Some(BenignKind::DuplicateObject)
    } else if message.contains("cannot run inside a transaction") || message.contains("vacuum") {
        Some(BenignKind::VacuumInTransaction)
    } else if message.contains("syntax error") || message.contains("unterminated") {
        Some(BenignKind::NestedBodySyntax)
    } else if message.contains("current transaction") && message.contains("aborted") {
        Some(BenignKind::AbortedTransaction)
    } else {
        None
    }
}
