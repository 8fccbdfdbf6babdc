//! Logging setup shared by the dbready binary and embedding pipelines.
//!
//! Log lines always go to stderr; stdout carries command results only.

use crate::Result;
use crate::error::DbReadyError;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Encoding of emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = DbReadyError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(DbReadyError::configuration(format!(
                "Unknown log format '{}', expected 'text' or 'json'",
                other
            ))),
        }
    }
}

/// How the process logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of `-v` flags
    pub verbose: u8,
    /// Errors only; takes precedence over `verbose`
    pub quiet: bool,
    /// `EnvFilter` directives replacing the verbosity defaults
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl LogOptions {
    /// Directives implied by the verbosity flags.
    ///
    /// Dependencies stay at `warn` until `-vv`, so sqlx and friends do not
    /// drown out readiness output.
    pub fn default_directives(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn,dbready=info,dbready_core=info",
            1 => "warn,dbready=debug,dbready_core=debug",
            2 => "info,dbready=trace,dbready_core=trace",
            _ => "trace",
        }
    }

    /// Filter from the explicit directives, or from the verbosity defaults
    /// when none are given.
    ///
    /// # Errors
    /// Returns a configuration error when the directives do not parse.
    pub fn build_filter(&self) -> Result<EnvFilter> {
        let directives = self
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.default_directives());

        EnvFilter::try_new(directives).map_err(|e| {
            DbReadyError::configuration(format!("Invalid log filter '{}': {}", directives, e))
        })
    }
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns a configuration error for an invalid filter or when a global
/// subscriber is already installed.
///
/// # Example
/// ```rust,no_run
/// use dbready_core::logging::{LogOptions, init_logging};
///
/// init_logging(&LogOptions { verbose: 1, ..LogOptions::default() })?;
/// # Ok::<(), dbready_core::DbReadyError>(())
/// ```
pub fn init_logging(options: &LogOptions) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(options.build_filter()?)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match options.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| DbReadyError::configuration(format!("Failed to initialize logging: {}", e)))
}
