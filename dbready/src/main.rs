//! Database readiness tool for ETL pipelines.
//!
//! Resolves a Postgres connection for the current environment, checks
//! connectivity and schema compatibility, and applies DDL sources.
//!
//! # Exit Status
//! - `0` when the database is ready or the requested operation succeeded
//! - `1` otherwise, including unreachable databases and failed statements

mod output;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dbready_core::config::{ConnectionOverrides, Settings};
use dbready_core::ddl::{DdlCatalog, DdlEngine};
use dbready_core::environment::{DEFAULT_SCAN_HOSTS, DEFAULT_SCAN_PORTS, TcpProbe, scan_endpoints};
use dbready_core::logging::{LogFormat, LogOptions, init_logging};
use dbready_core::{ConnectionPool, ValidationOrchestrator};
use output::Render;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "dbready")]
#[command(about = "Database readiness checks for ETL pipelines")]
#[command(version)]
#[command(long_about = "
dbready - Database readiness for ETL pipelines

Resolves where PostgreSQL lives (compose network, container, CI runner or
local host), validates the connection, checks platform tables against their
requirements and applies DDL sources statement by statement.

Connection settings come from DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD
(or the POSTGRES_* equivalents), the first .env file found, or environment
defaults.

EXAMPLES:
  dbready diagnose
  dbready check --platform steam --auto-repair
  dbready apply-ddl --ddl-dir etl/sql --platform sony
  dbready --json health
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show environment detection, resolved config and endpoint probes
    Diagnose,
    /// Summarize connection, schema and pool health
    Health,
    /// Validate connection and schema readiness
    Check(CheckArgs),
    /// Apply DDL sources from a directory
    ApplyDdl(ApplyDdlArgs),
    /// Probe hosts and ports for a listening database
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Platform to validate (repeatable, default: all)
    #[arg(long = "platform", value_name = "PLATFORM")]
    platforms: Vec<String>,

    /// Apply the platforms' DDL when tables are missing or incomplete
    #[arg(long)]
    auto_repair: bool,

    /// Directory holding DDL sources (default: DBREADY_DDL_DIR or etl/sql)
    #[arg(long, value_name = "DIR")]
    ddl_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ApplyDdlArgs {
    /// Directory holding DDL sources (default: DBREADY_DDL_DIR or etl/sql)
    #[arg(long, value_name = "DIR")]
    ddl_dir: Option<PathBuf>,

    /// Only apply sources for this platform (repeatable)
    #[arg(long = "platform", value_name = "PLATFORM")]
    platforms: Vec<String>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Host to probe (repeatable)
    #[arg(long = "host", value_name = "HOST")]
    hosts: Vec<String>,

    /// Port to probe (repeatable)
    #[arg(long = "port", value_name = "PORT")]
    ports: Vec<u16>,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all log output except errors")]
    quiet: bool,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log filter directives, replacing the -v/-q defaults
    #[arg(long, global = true, env = "DBREADY_LOG", value_name = "DIRECTIVES")]
    log_filter: Option<String>,

    /// Log line encoding: text or json
    #[arg(long, global = true, default_value = "text", value_name = "FORMAT")]
    log_format: LogFormat,
}

impl GlobalArgs {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            verbose: self.verbose,
            quiet: self.quiet,
            filter: self.log_filter.clone(),
            format: self.log_format,
        }
    }
}

/// Overrides applied on top of the resolved connection.
#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Override the resolved host
    #[arg(long, global = true, value_name = "HOST")]
    db_host: Option<String>,

    /// Override the resolved port
    #[arg(long, global = true, value_name = "PORT")]
    db_port: Option<u16>,

    /// Override the resolved database name
    #[arg(long, global = true, value_name = "NAME")]
    db_name: Option<String>,

    /// Override the resolved user
    #[arg(long, global = true, value_name = "USER")]
    db_user: Option<String>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConnectionOverrides {
        let mut overrides = ConnectionOverrides::default();
        if let Some(host) = &self.db_host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.db_port {
            overrides = overrides.with_port(port);
        }
        if let Some(database) = &self.db_name {
            overrides = overrides.with_database(database.clone());
        }
        if let Some(user) = &self.db_user {
            overrides = overrides.with_user(user.clone());
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.global.log_options()) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs the selected command; `Ok(false)` means "not ready" or "failed".
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let settings = Settings::load().context("Failed to load settings")?;
    let json = cli.global.json;

    match &cli.command {
        Command::Diagnose => {
            let diagnostics = orchestrator(settings, cli).diagnostics().await?;
            diagnostics.render(json)?;
            Ok(diagnostics.readiness.connection_valid)
        }
        Command::Health => {
            let health = orchestrator(settings, cli).check_health().await?;
            health.render(json)?;
            Ok(health.healthy)
        }
        Command::Check(args) => {
            let mut orchestrator = orchestrator(settings.clone(), cli);
            if args.auto_repair {
                let dir = ddl_dir(&settings, args.ddl_dir.as_ref());
                orchestrator = orchestrator.with_catalog(load_catalog(&dir)?);
            }
            let result = orchestrator
                .validate_full_stack(&args.platforms, args.auto_repair)
                .await?;
            result.render(json)?;
            Ok(result.ready)
        }
        Command::ApplyDdl(args) => apply_ddl(settings, cli, args).await,
        Command::Scan(args) => {
            let hosts = if args.hosts.is_empty() {
                DEFAULT_SCAN_HOSTS.iter().map(|h| h.to_string()).collect()
            } else {
                args.hosts.clone()
            };
            let ports = if args.ports.is_empty() {
                DEFAULT_SCAN_PORTS.to_vec()
            } else {
                args.ports.clone()
            };

            let probes = scan_endpoints(
                &TcpProbe::default(),
                &hosts,
                &ports,
                settings.probe.candidate_timeout,
            )
            .await;
            probes.render(json)?;
            Ok(probes.iter().any(|p| p.reachable))
        }
    }
}

fn orchestrator(settings: Settings, cli: &Cli) -> ValidationOrchestrator {
    ValidationOrchestrator::new(settings).with_overrides(cli.connection.overrides())
}

fn ddl_dir(settings: &Settings, arg: Option<&PathBuf>) -> PathBuf {
    arg.cloned().unwrap_or_else(|| settings.ddl_dir.clone())
}

fn load_catalog(dir: &Path) -> anyhow::Result<DdlCatalog> {
    let catalog = DdlCatalog::load(dir)
        .with_context(|| format!("Failed to load DDL sources from {}", dir.display()))?;
    info!("Loaded {} DDL sources from {}", catalog.len(), dir.display());
    Ok(catalog)
}

async fn apply_ddl(settings: Settings, cli: &Cli, args: &ApplyDdlArgs) -> anyhow::Result<bool> {
    let catalog = load_catalog(&ddl_dir(&settings, args.ddl_dir.as_ref()))?;
    let pool_config = settings.pool.clone();
    let orchestrator = orchestrator(settings, cli);

    let (validation, config) = orchestrator.validate_connection().await;
    if !validation.valid {
        error!("Connection validation failed: {}", validation.message);
        eprintln!("{}", validation.message);
        return Ok(false);
    }
    info!("{}", validation.message);

    let pool = ConnectionPool::connect_lazy(&config, pool_config)?;
    let engine = DdlEngine::for_pool(pool.clone()).with_catalog(catalog);
    let results = if args.platforms.is_empty() {
        engine.apply_all().await?
    } else {
        engine.apply_for_platforms(&args.platforms).await?
    };
    pool.close().await;

    results.render(cli.global.json)?;
    Ok(results.iter().all(|r| r.success))
}
