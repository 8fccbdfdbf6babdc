//! DDL sources: cleaning, splitting, ordering and best-effort application.

pub mod catalog;
pub mod classify;
pub mod clean;
pub mod engine;
pub mod splitter;

pub use catalog::{DdlCatalog, DdlUnit, GENERIC_PLATFORM, Layer, infer_platform};
pub use classify::{BenignKind, classify_failure};
pub use clean::clean_ddl;
pub use engine::{
    DdlBatchResult, DdlEngine, ErrorOrigin, PgStatementExecutor, StatementError, StatementExecutor,
    StatementOutcome, StatementReport, StatementSession,
};
pub use splitter::{DdlStatement, split_statements};
