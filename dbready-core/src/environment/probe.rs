//! Bounded-timeout network probes.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};

/// Hosts scanned by [`scan_endpoints`] when none are given.
pub const DEFAULT_SCAN_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "host.docker.internal"];

/// Ports scanned by [`scan_endpoints`] when none are given.
pub const DEFAULT_SCAN_PORTS: [u16; 2] = [5432, 5433];

/// Network reachability checks used during classification and resolution.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether `host` resolves to at least one address.
    async fn resolves(&self, host: &str) -> bool;

    /// Whether a TCP connection to `host:port` opens within `timeout`.
    async fn reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Probe backed by the system resolver and real TCP connects.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    dns_timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            dns_timeout: Duration::from_secs(1),
        }
    }
}

impl TcpProbe {
    /// Creates a probe whose DNS lookups give up after `dns_timeout`.
    pub fn new(dns_timeout: Duration) -> Self {
        Self { dns_timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn resolves(&self, host: &str) -> bool {
        // Port is irrelevant for resolution but required by the lookup API
        match tokio::time::timeout(self.dns_timeout, lookup_host((host, 0))).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                tracing::trace!("DNS lookup for {} failed: {}", host, e);
                false
            }
            Err(_) => {
                tracing::trace!("DNS lookup for {} timed out", host);
                false
            }
        }
    }

    async fn reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                tracing::debug!("Connection successful to {}:{}", host, port);
                true
            }
            Ok(Err(e)) => {
                tracing::debug!("Connection failed to {}:{}: {}", host, port, e);
                false
            }
            Err(_) => {
                tracing::debug!("Connection to {}:{} timed out after {:?}", host, port, timeout);
                false
            }
        }
    }
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointProbe {
    pub host: String,
    pub port: u16,
    pub reachable: bool,
}

/// Probes every `host x port` pair, hosts outer, in the given order.
pub async fn scan_endpoints(
    probe: &dyn Probe,
    hosts: &[String],
    ports: &[u16],
    timeout: Duration,
) -> Vec<EndpointProbe> {
    let mut results = Vec::with_capacity(hosts.len() * ports.len());
    for host in hosts {
        for &port in ports {
            let reachable = probe.reachable(host, port, timeout).await;
            results.push(EndpointProbe {
                host: host.clone(),
                port,
                reachable,
            });
        }
    }
    results
}


#[cfg(test)]
mod tests {
    use super::fake::FakeProbe;
    use super::*;

    #[tokio::test]
    async fn test_scan_endpoints_covers_every_pair() {
        let probe = FakeProbe::new().listening("127.0.0.1", 5433);
        let hosts: Vec<String> = DEFAULT_SCAN_HOSTS.iter().map(|h| h.to_string()).collect();

        let results = scan_endpoints(&probe, &hosts, &DEFAULT_SCAN_PORTS, Duration::from_secs(2)).await;

        assert_eq!(results.len(), 6);
        assert_eq!(
            results.iter().filter(|r| r.reachable).collect::<Vec<_>>(),
            vec![&EndpointProbe {
                host: "127.0.0.1".to_string(),
                port: 5433,
                reachable: true,
            }]
        );
        assert_eq!(probe.calls()[0], "tcp:localhost:5432");
        assert_eq!(probe.calls()[1], "tcp:localhost:5433");
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::default();
        assert!(probe.reachable("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_port() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TcpProbe::default();
        assert!(!probe.reachable("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_resolves_localhost() {
        let probe = TcpProbe::default();
        assert!(probe.resolves("localhost").await);
        assert!(!probe.resolves("no-such-host.invalid").await);
    }
}
