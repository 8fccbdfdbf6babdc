//! Text and JSON rendering of command results.

use dbready_core::environment::EndpointProbe;
use dbready_core::orchestrator::StackDiagnostics;
use dbready_core::schema::{Severity, ValidationReport};
use dbready_core::{DdlBatchResult, HealthSummary, ReadinessResult, StatementOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Result printable as human-readable text or pretty JSON on stdout.
pub trait Render: Serialize {
    fn write_text(&self, out: &mut String) -> std::fmt::Result;

    fn to_output(&self, json: bool) -> anyhow::Result<String> {
        if json {
            return Ok(serde_json::to_string_pretty(self)?);
        }
        let mut out = String::new();
        self.write_text(&mut out)?;
        Ok(out)
    }

    fn render(&self, json: bool) -> anyhow::Result<()> {
        println!("{}", self.to_output(json)?.trim_end());
        Ok(())
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "OK" } else { "FAILED" }
}

fn write_reports(out: &mut String, reports: &BTreeMap<String, ValidationReport>) -> std::fmt::Result {
    if reports.is_empty() {
        return writeln!(out, "  (no tables checked)");
    }
    for (key, report) in reports {
        writeln!(
            out,
            "  {:<45} {:<7} score {:.2}",
            key,
            if report.valid { "valid" } else { "INVALID" },
            report.compatibility_score
        )?;
        if !report.missing_columns.is_empty() {
            writeln!(out, "      missing: {}", report.missing_columns.join(", "))?;
        }
        for mismatch in &report.type_mismatches {
            writeln!(
                out,
                "      type mismatch: {} expected {}, found {}",
                mismatch.column, mismatch.expected, mismatch.actual
            )?;
        }
        for issue in report
            .issues
            .iter()
            .filter(|i| matches!(i.severity, Severity::Critical | Severity::Warning))
            .filter(|i| i.column.is_none())
        {
            writeln!(out, "      {:?}: {}", issue.severity, issue.message)?;
        }
    }
    Ok(())
}

impl Render for ReadinessResult {
    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "Connection: {} ({})", status(self.connection_valid), self.connection_message)?;
        writeln!(out, "Target:     {}", self.config_used.redacted_uri())?;
        writeln!(out, "Environment: {}", self.config_used.environment)?;
        if self.connection_valid {
            writeln!(out, "Schema:     {}", status(self.schema_valid))?;
            write_reports(out, &self.schema_results)?;
        }
        if !self.repair_results.is_empty() {
            writeln!(out, "Repair:")?;
            self.repair_results.write_text(out)?;
        }
        if let Some(reason) = &self.repair_skipped {
            writeln!(out, "Repair skipped: {}", reason)?;
        }
        writeln!(out, "Ready for ETL: {}", if self.ready { "yes" } else { "no" })
    }
}

impl Render for HealthSummary {
    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "Healthy:    {}", if self.healthy { "yes" } else { "no" })?;
        writeln!(
            out,
            "Target:     {}:{}/{} ({})",
            self.config_used.host, self.config_used.port, self.config_used.database, self.config_used.environment
        )?;
        writeln!(out, "Connection: {}", status(self.connection_valid))?;
        if let Some(pool) = &self.pool {
            writeln!(
                out,
                "Pool:       {} active / {} idle / max {} (latency {:.2} ms)",
                pool.pool.active_connections, pool.pool.idle_connections, pool.pool.max_connections, pool.latency_ms
            )?;
            if let Some(version) = &pool.server_version {
                writeln!(out, "Server:     {}", version)?;
            }
            if let Some(error) = &pool.error {
                writeln!(out, "Pool error: {}", error)?;
            }
        }
        if self.connection_valid {
            writeln!(out, "Schema:     {}", status(self.schema_valid))?;
            write_reports(out, &self.validation_results)?;
        }
        Ok(())
    }
}

impl Render for StackDiagnostics {
    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        let resolver = &self.resolver;
        writeln!(out, "Environment detection:")?;
        writeln!(out, "  Environment: {}", resolver.environment_detected)?;
        match &resolver.dotenv_source {
            Some(path) => writeln!(out, "  .env file:   {}", path.display())?,
            None => writeln!(out, "  .env file:   (none found)")?,
        }

        writeln!(out, "Connection configuration:")?;
        writeln!(out, "  Host:     {}", resolver.selected_config.host)?;
        writeln!(out, "  Port:     {}", resolver.selected_config.port)?;
        writeln!(out, "  Database: {}", resolver.selected_config.database)?;
        writeln!(out, "  User:     {}", resolver.selected_config.user)?;
        writeln!(out, "  URI:      {}", resolver.connection_uri)?;
        writeln!(
            out,
            "  Valid:    {} ({})",
            status(resolver.connection_valid),
            resolver.validation_message
        )?;

        writeln!(out, "Environment variables:")?;
        for (key, set) in &resolver.environment_variables {
            writeln!(out, "  {:<22} {}", key, if *set { "set" } else { "not set" })?;
        }

        writeln!(out, "Network tests:")?;
        resolver.network_tests.write_text(out)?;

        writeln!(out, "Schema validation:")?;
        write_reports(out, &self.readiness.schema_results)?;
        writeln!(out, "Overall status: {}", self.overall_status)
    }
}

impl Render for Vec<EndpointProbe> {
    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        for probe in self {
            let endpoint = format!("{}:{}", probe.host, probe.port);
            writeln!(
                out,
                "  {:<32} {}",
                endpoint,
                if probe.reachable { "reachable" } else { "unreachable" }
            )?;
        }
        Ok(())
    }
}

impl Render for Vec<DdlBatchResult> {
    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(out, "  (no DDL sources applied)");
        }
        for batch in self {
            writeln!(
                out,
                "  {:<32} {} - {} applied, {} skipped, {} failed ({} ms)",
                batch.source_id,
                status(batch.success),
                batch.applied_count(),
                batch.skipped_count(),
                batch.failed_count(),
                batch.elapsed_ms
            )?;
            if let Some(error) = &batch.connection_error {
                writeln!(out, "      connection failed: {}", error)?;
            }
            for statement in &batch.statements {
                match &statement.outcome {
                    StatementOutcome::Failed { reason } => {
                        writeln!(out, "      #{} failed: {}", statement.index, reason)?;
                        writeln!(out, "         {}", statement.preview)?;
                    }
                    StatementOutcome::SkippedBenign { kind, .. } => {
                        writeln!(out, "      #{} skipped: {}", statement.index, kind)?;
                    }
                    StatementOutcome::Applied { .. } => {}
                }
            }
        }
        Ok(())
    }
}
