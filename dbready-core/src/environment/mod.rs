//! Runtime environment classification.
//!
//! The classifier decides where the process runs (compose network, plain
//! container, CI runner, bare host) from environment markers and, as a last
//! resort, a short DNS probe for well-known compose service names.

mod probe;

#[cfg(test)]
pub(crate) use probe::fake;
pub use probe::{
    DEFAULT_SCAN_HOSTS, DEFAULT_SCAN_PORTS, EndpointProbe, Probe, TcpProbe, scan_endpoints,
};

use crate::config::EnvSnapshot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Variables whose presence marks a CI runner.
const CI_INDICATORS: [&str; 3] = ["CI", "GITHUB_ACTIONS", "JENKINS_URL"];

/// Service names a compose stack typically gives its Postgres container.
pub const COMPOSE_SERVICE_HOSTS: [&str; 4] = ["postgres", "db", "database", "postgresql"];

/// Where the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    DockerCompose,
    DockerHost,
    LocalHost,
    CiCd,
    Unknown,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DockerCompose => "docker_compose",
            Self::DockerHost => "docker_host",
            Self::LocalHost => "local_host",
            Self::CiCd => "ci_cd",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Infers the [`EnvironmentKind`] from an [`EnvSnapshot`].
///
/// Precedence, first match wins:
/// 1. `DISABLE_DOCKER_DETECT=1` gives `LocalHost`
/// 2. any of `CI`, `GITHUB_ACTIONS`, `JENKINS_URL` gives `CiCd`
/// 3. the container marker file gives `DockerHost`
/// 4. `COMPOSE_PROJECT_NAME`, or a compose service name that resolves,
///    gives `DockerCompose`
/// 5. otherwise `LocalHost`
#[derive(Clone)]
pub struct EnvironmentClassifier {
    env: EnvSnapshot,
    container_marker: PathBuf,
    probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for EnvironmentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentClassifier")
            .field("container_marker", &self.container_marker)
            .finish_non_exhaustive()
    }
}

impl EnvironmentClassifier {
    pub fn new(env: EnvSnapshot, container_marker: impl Into<PathBuf>, probe: Arc<dyn Probe>) -> Self {
        Self {
            env,
            container_marker: container_marker.into(),
            probe,
        }
    }

    /// Full classification, including the compose DNS probe.
    pub async fn classify(&self) -> EnvironmentKind {
        if let Some(kind) = self.classify_markers() {
            return kind;
        }

        for host in COMPOSE_SERVICE_HOSTS {
            if self.probe.resolves(host).await {
                tracing::debug!("Found Docker Compose service: {}", host);
                return EnvironmentKind::DockerCompose;
            }
        }

        EnvironmentKind::LocalHost
    }

    /// Classification from markers alone; never touches the network.
    pub fn classify_static(&self) -> EnvironmentKind {
        self.classify_markers().unwrap_or(EnvironmentKind::LocalHost)
    }

    fn classify_markers(&self) -> Option<EnvironmentKind> {
        if self.env.get("DISABLE_DOCKER_DETECT") == Some("1") {
            tracing::info!("Docker detection disabled via DISABLE_DOCKER_DETECT=1");
            return Some(EnvironmentKind::LocalHost);
        }

        if CI_INDICATORS.iter().any(|key| self.env.is_set(key)) {
            return Some(EnvironmentKind::CiCd);
        }

        if self.container_marker.exists() {
            return Some(EnvironmentKind::DockerHost);
        }

        if self.env.get("COMPOSE_PROJECT_NAME").is_some() {
            return Some(EnvironmentKind::DockerCompose);
        }

        None
    }
}
