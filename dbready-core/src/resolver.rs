//! Environment-aware connection resolution.
//!
//! Resolution never fails. It walks three tiers and stops at the first that
//! yields a config:
//!
//! 1. a complete set of explicit variables, used verbatim without probing
//! 2. ordered candidates for the classified environment, first reachable wins
//! 3. a static `localhost` fallback tagged `Unknown`

use crate::config::{
    ConnectionConfig, DEFAULT_DATABASE, DEFAULT_PORT, DEFAULT_USER, EnvSnapshot, ProbeSettings,
    Settings,
};
use crate::environment::{EndpointProbe, EnvironmentClassifier, EnvironmentKind, Probe, TcpProbe};
use crate::error::PASSWORD_MASK;
use serde::Serialize;
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Alias pairs for each explicit connection field; the first name wins.
const HOST_VARS: [&str; 2] = ["DB_HOST", "POSTGRES_HOST"];
const PORT_VARS: [&str; 2] = ["DB_PORT", "POSTGRES_PORT"];
const DATABASE_VARS: [&str; 2] = ["DB_NAME", "POSTGRES_DB"];
const USER_VARS: [&str; 2] = ["DB_USER", "POSTGRES_USER"];
const PASSWORD_VARS: [&str; 2] = ["DB_PASSWORD", "POSTGRES_PASSWORD"];

/// Variables whose presence is reported by [`ConnectionConfigResolver::diagnostics`].
const DIAGNOSTIC_VARS: [&str; 12] = [
    "DB_HOST",
    "POSTGRES_HOST",
    "DB_PORT",
    "POSTGRES_PORT",
    "DB_NAME",
    "POSTGRES_DB",
    "DB_USER",
    "POSTGRES_USER",
    "DB_PASSWORD",
    "POSTGRES_PASSWORD",
    "COMPOSE_PROJECT_NAME",
    "DISABLE_DOCKER_DETECT",
];

/// Fixed endpoints tested by diagnostics besides the selected one.
const DIAGNOSTIC_ENDPOINTS: [(&str, u16); 3] = [
    ("localhost", 5432),
    ("127.0.0.1", 5432),
    ("host.docker.internal", 5432),
];

/// Candidate hosts for an environment, in probe order.
pub fn candidate_hosts(kind: EnvironmentKind) -> &'static [&'static str] {
    match kind {
        EnvironmentKind::DockerCompose => &["postgres", "db", "database", "postgresql"],
        EnvironmentKind::DockerHost => &[
            "host.docker.internal",
            "host-gateway",
            "gateway.docker.internal",
        ],
        EnvironmentKind::LocalHost => &["localhost", "127.0.0.1"],
        EnvironmentKind::CiCd => &["localhost"],
        EnvironmentKind::Unknown => &[],
    }
}

/// Outcome of [`ConnectionConfigResolver::validate_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionValidation {
    pub valid: bool,
    /// Human-readable result; never contains the password
    pub message: String,
}

/// Snapshot of what resolution saw and decided.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverDiagnostics {
    pub environment_detected: EnvironmentKind,
    pub selected_config: ConnectionConfig,
    pub connection_uri: String,
    pub connection_valid: bool,
    pub validation_message: String,
    /// Whether each relevant variable is set; values are never reported
    pub environment_variables: BTreeMap<String, bool>,
    pub dotenv_source: Option<PathBuf>,
    pub network_tests: Vec<EndpointProbe>,
}

/// Produces a connectable [`ConnectionConfig`] for the current environment.
#[derive(Clone)]
pub struct ConnectionConfigResolver {
    env: EnvSnapshot,
    classifier: EnvironmentClassifier,
    probe: Arc<dyn Probe>,
    timeouts: ProbeSettings,
}

impl std::fmt::Debug for ConnectionConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfigResolver")
            .field("classifier", &self.classifier)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ConnectionConfigResolver {
    /// Creates a resolver that probes the real network.
    pub fn new(settings: &Settings) -> Self {
        Self::with_probe(settings, Arc::new(TcpProbe::default()))
    }

    /// Creates a resolver with a custom probe.
    pub fn with_probe(settings: &Settings, probe: Arc<dyn Probe>) -> Self {
        let classifier = EnvironmentClassifier::new(
            settings.env.clone(),
            settings.probe.container_marker.clone(),
            Arc::clone(&probe),
        );
        Self {
            env: settings.env.clone(),
            classifier,
            probe,
            timeouts: settings.probe.clone(),
        }
    }

    pub fn classifier(&self) -> &EnvironmentClassifier {
        &self.classifier
    }

    /// Resolves a config; always returns one.
    pub async fn resolve(&self) -> ConnectionConfig {
        if let Some(config) = self.explicit_config() {
            tracing::info!("Using explicit environment configuration: {}", config);
            return config;
        }

        let kind = self.classifier.classify().await;
        self.resolve_detected(kind).await
    }

    /// Candidate and fallback tiers for an already classified environment.
    async fn resolve_detected(&self, kind: EnvironmentKind) -> ConnectionConfig {
        tracing::info!("Detected environment: {}", kind);

        for host in candidate_hosts(kind) {
            if self
                .probe
                .reachable(host, DEFAULT_PORT, self.timeouts.candidate_timeout)
                .await
            {
                let config = ConnectionConfig::with_defaults(*host, kind);
                tracing::info!("Using environment default configuration: {}", config);
                return config;
            }
        }

        let config = Self::fallback();
        tracing::warn!("Using fallback configuration: {}", config);
        config
    }

    /// The explicit tier: a config when all five fields are set.
    ///
    /// The environment tag comes from static classification so this tier never
    /// touches the network.
    pub fn explicit_config(&self) -> Option<ConnectionConfig> {
        let host = self.env.first_of(&HOST_VARS)?;
        let raw_port = self.env.first_of(&PORT_VARS)?;
        let database = self.env.first_of(&DATABASE_VARS)?;
        let user = self.env.first_of(&USER_VARS)?;
        let password = self.env.first_of(&PASSWORD_VARS)?;

        let Ok(port) = raw_port.trim().parse::<u16>() else {
            tracing::warn!(
                "Ignoring explicit configuration: port '{}' is not a valid port number",
                raw_port
            );
            return None;
        };

        Some(ConnectionConfig::new(
            host,
            port,
            database,
            user,
            password,
            self.classifier.classify_static(),
        ))
    }

    /// Static last-resort config.
    pub fn fallback() -> ConnectionConfig {
        ConnectionConfig::new(
            "localhost",
            DEFAULT_PORT,
            DEFAULT_DATABASE,
            DEFAULT_USER,
            DEFAULT_USER,
            EnvironmentKind::Unknown,
        )
    }

    /// Checks TCP reachability, then performs an authenticated round trip.
    ///
    /// Never fails; every outcome is reported in the returned value.
    pub async fn validate_connection(&self, config: &ConnectionConfig) -> ConnectionValidation {
        if !self
            .probe
            .reachable(&config.host, config.port, self.timeouts.validation_timeout)
            .await
        {
            return ConnectionValidation {
                valid: false,
                message: format!(
                    "Cannot connect to {}:{} - PostgreSQL service not available",
                    config.host, config.port
                ),
            };
        }

        match server_version(config, self.timeouts.validation_timeout).await {
            Ok(version) => {
                tracing::info!("PostgreSQL connection successful: {}", version);
                ConnectionValidation {
                    valid: true,
                    message: format!("Connected to PostgreSQL: {}", version),
                }
            }
            Err(message) => ConnectionValidation {
                valid: false,
                message: mask_secret(&message, config.password()),
            },
        }
    }

    /// Resolves, validates and probes the usual endpoints.
    pub async fn diagnostics(&self) -> ResolverDiagnostics {
        let environment_detected = self.classifier.classify().await;
        let config = match self.explicit_config() {
            Some(config) => config,
            None => self.resolve_detected(environment_detected).await,
        };
        let validation = self.validate_connection(&config).await;

        let environment_variables = DIAGNOSTIC_VARS
            .iter()
            .map(|key| (key.to_string(), self.env.get(key).is_some()))
            .collect();

        let mut endpoints: Vec<(String, u16)> = DIAGNOSTIC_ENDPOINTS
            .iter()
            .map(|(host, port)| (host.to_string(), *port))
            .collect();
        endpoints.push((config.host.clone(), config.port));

        let mut network_tests = Vec::with_capacity(endpoints.len());
        for (host, port) in endpoints {
            let reachable = self
                .probe
                .reachable(&host, port, self.timeouts.candidate_timeout)
                .await;
            network_tests.push(EndpointProbe {
                host,
                port,
                reachable,
            });
        }

        ResolverDiagnostics {
            environment_detected,
            connection_uri: config.redacted_uri(),
            selected_config: config,
            connection_valid: validation.valid,
            validation_message: validation.message,
            environment_variables,
            dotenv_source: self.env.dotenv_source().map(|p| p.to_path_buf()),
            network_tests,
        }
    }
}

/// Connect options for a config, shared with the pool.
pub(crate) fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(config.password())
        .application_name("dbready")
}

async fn server_version(config: &ConnectionConfig, timeout: Duration) -> Result<String, String> {
    let options = connect_options(config);

    let mut conn = match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(format!("PostgreSQL connection failed: {}", e)),
        Err(_) => {
            return Err(format!(
                "PostgreSQL connection timed out after {:?}",
                timeout
            ));
        }
    };

    let version = sqlx::query_scalar::<_, String>("SELECT version()")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| format!("Connection validation error: {}", e));

    if let Err(e) = conn.close().await {
        tracing::debug!("Error closing validation connection: {}", e);
    }

    version
}

fn mask_secret(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        message.to_string()
    } else {
        message.replace(secret, PASSWORD_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::COMPOSE_SERVICE_HOSTS;
    use crate::environment::fake::FakeProbe;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_snapshot(EnvSnapshot::from_pairs(pairs.iter().copied()))
            .unwrap()
            .with_container_marker("/nonexistent/dbready/.dockerenv")
    }

    const EXPLICIT: [(&str, &str); 5] = [
        ("DB_HOST", "warehouse"),
        ("DB_PORT", "6543"),
        ("DB_NAME", "analytics"),
        ("DB_USER", "etl"),
        ("DB_PASSWORD", "pw"),
    ];

    #[tokio::test]
    async fn test_explicit_variables_used_verbatim_without_probing() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(&settings(&EXPLICIT), probe.clone());

        let config = resolver.resolve().await;

        assert_eq!(config.host, "warehouse");
        assert_eq!(config.port, 6543);
        assert_eq!(config.database, "analytics");
        assert_eq!(config.user, "etl");
        assert_eq!(config.password(), "pw");
        assert_eq!(config.environment, EnvironmentKind::LocalHost);
        assert!(probe.calls().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_aliases_and_precedence() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(
            &settings(&[
                ("DB_HOST", ""),
                ("POSTGRES_HOST", "pg"),
                ("DB_PORT", "5432"),
                ("POSTGRES_PORT", "9999"),
                ("POSTGRES_DB", "raw"),
                ("POSTGRES_USER", "admin"),
                ("POSTGRES_PASSWORD", "x"),
                ("CI", "1"),
            ]),
            probe,
        );

        let config = resolver.explicit_config().unwrap();
        assert_eq!(config.host, "pg");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "raw");
        assert_eq!(config.environment, EnvironmentKind::CiCd);
    }

    #[tokio::test]
    async fn test_incomplete_or_invalid_explicit_tuple_is_ignored() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(&settings(&EXPLICIT[..4]), probe.clone());
        assert!(resolver.explicit_config().is_none());

        let mut bad_port = EXPLICIT;
        bad_port[1] = ("DB_PORT", "70000");
        let resolver = ConnectionConfigResolver::with_probe(&settings(&bad_port), probe);
        assert!(resolver.explicit_config().is_none());
    }

    #[tokio::test]
    async fn test_compose_candidates_probed_in_order() {
        let probe = Arc::new(FakeProbe::new().listening("database", 5432));
        let resolver = ConnectionConfigResolver::with_probe(
            &settings(&[("COMPOSE_PROJECT_NAME", "etl")]),
            probe.clone(),
        );

        let config = resolver.resolve().await;

        assert_eq!(config.host, "database");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "platform");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.environment, EnvironmentKind::DockerCompose);
        assert_eq!(
            probe.calls(),
            vec!["tcp:postgres:5432", "tcp:db:5432", "tcp:database:5432"]
        );
    }

    #[tokio::test]
    async fn test_no_reachable_candidate_falls_back() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(
            &settings(&[("COMPOSE_PROJECT_NAME", "etl")]),
            probe.clone(),
        );

        let config = resolver.resolve().await;

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.environment, EnvironmentKind::Unknown);
        assert_eq!(probe.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_local_host_candidates() {
        let probe = Arc::new(FakeProbe::new().listening("127.0.0.1", 5432));
        let resolver = ConnectionConfigResolver::with_probe(
            &settings(&[("DISABLE_DOCKER_DETECT", "1")]),
            probe,
        );

        let config = resolver.resolve().await;
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.environment, EnvironmentKind::LocalHost);
    }

    #[test]
    fn test_candidate_table() {
        assert_eq!(candidate_hosts(EnvironmentKind::CiCd), &["localhost"]);
        assert_eq!(candidate_hosts(EnvironmentKind::DockerHost).len(), 3);
        assert!(candidate_hosts(EnvironmentKind::Unknown).is_empty());
    }

    #[tokio::test]
    async fn test_validate_unreachable_host() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(&settings(&[]), probe);
        let config = ConnectionConfig::new("ghost", 5432, "platform", "u", "topsecret", EnvironmentKind::Unknown);

        let result = resolver.validate_connection(&config).await;

        assert!(!result.valid);
        assert!(result.message.contains("ghost:5432"));
        assert!(!result.message.contains("topsecret"));
    }

    #[tokio::test]
    async fn test_validate_reachable_but_not_postgres() {
        // Probe claims reachability; the real connect is refused
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = Arc::new(FakeProbe::new().listening("127.0.0.1", port));
        let resolver = ConnectionConfigResolver::with_probe(&settings(&[]), probe);
        let config = ConnectionConfig::new("127.0.0.1", port, "platform", "u", "topsecret", EnvironmentKind::Unknown);

        let result = resolver.validate_connection(&config).await;

        assert!(!result.valid);
        assert!(!result.message.contains("topsecret"));
    }

    #[tokio::test]
    async fn test_diagnostics_reports_presence_only() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(
            &settings(&[("DB_PASSWORD", "hunter2"), ("DISABLE_DOCKER_DETECT", "1")]),
            probe,
        );

        let diagnostics = resolver.diagnostics().await;

        assert_eq!(diagnostics.environment_detected, EnvironmentKind::LocalHost);
        assert!(diagnostics.environment_variables["DB_PASSWORD"]);
        assert!(!diagnostics.environment_variables["DB_HOST"]);
        assert_eq!(diagnostics.network_tests.len(), 4);
        assert!(!diagnostics.connection_valid);
        assert!(diagnostics.connection_uri.contains(PASSWORD_MASK));

        let json = serde_json::to_string(&diagnostics).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_diagnostics_classifies_once() {
        let probe = Arc::new(FakeProbe::new());
        let resolver = ConnectionConfigResolver::with_probe(&settings(&[]), probe.clone());

        let diagnostics = resolver.diagnostics().await;

        assert_eq!(diagnostics.environment_detected, EnvironmentKind::LocalHost);
        let lookups = probe.calls().iter().filter(|c| c.starts_with("dns:")).count();
        assert_eq!(lookups, COMPOSE_SERVICE_HOSTS.len());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("bad pw for pw", "pw"), "bad **** for ****");
        assert_eq!(mask_secret("unchanged", ""), "unchanged");
    }
}
