//! Node validation
//!
//! Turns a configured or discovered host into a node identity: resolve the
//! host to its addresses, probe each address until one answers with a node
//! name, and read the node's features and build version from the same reply.

use crate::host::Host;
use crate::info::InfoClient;
use crate::partition::InfoProtocol;
use crate::pool::ConnectionFactory;
use crate::{ClusterError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// What a probe learned about a node
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub name: String,
    /// Address that answered the probe
    pub host: Host,
    /// Every address the candidate host resolved to
    pub aliases: Vec<Host>,
    pub features: HashSet<String>,
    pub info_protocol: InfoProtocol,
}

/// Probes candidate hosts
pub struct NodeValidator<'a> {
    factory: &'a ConnectionFactory,
    info: &'a dyn InfoClient,
    timeout: Duration,
    cluster_name: Option<&'a str>,
}

impl<'a> NodeValidator<'a> {
    pub fn new(
        factory: &'a ConnectionFactory,
        info: &'a dyn InfoClient,
        timeout: Duration,
        cluster_name: Option<&'a str>,
    ) -> Self {
        Self {
            factory,
            info,
            timeout,
            cluster_name,
        }
    }

    /// Resolve `host` and return the identity of the first address that answers
    pub async fn validate(&self, host: &Host) -> Result<NodeIdentity> {
        let aliases = resolve(host).await?;
        debug!(host = %host, aliases = aliases.len(), "Validating node");

        let mut last_error = None;
        for alias in &aliases {
            match self.probe(alias).await {
                Ok(Some((name, features, info_protocol))) => {
                    return Ok(NodeIdentity {
                        name,
                        host: alias.clone(),
                        aliases: aliases.clone(),
                        features,
                        info_protocol,
                    });
                }
                Ok(None) => {
                    last_error = Some(ClusterError::invalid_node(format!(
                        "{} did not report a node name",
                        alias
                    )));
                }
                Err(e) => {
                    debug!(host = %alias, error = %e, "Probe failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ClusterError::invalid_node(format!("{} resolved to no addresses", host))
        }))
    }

    async fn probe(&self, alias: &Host) -> Result<Option<(String, HashSet<String>, InfoProtocol)>> {
        let mut conn = self.factory.create(alias, Some(self.timeout)).await?;

        let mut commands = vec!["node", "build", "features"];
        if self.cluster_name.is_some() {
            commands.push("cluster-name");
        }

        let outcome = self.info.request(conn.as_mut(), &commands).await;
        conn.close().await;
        let info = outcome?;

        let Some(name) = info.get("node").filter(|n| !n.is_empty()) else {
            return Ok(None);
        };

        if let Some(expected) = self.cluster_name {
            let reported = info.get("cluster-name").map(String::as_str).unwrap_or_default();
            if reported != expected {
                return Err(ClusterError::invalid_node(format!(
                    "Node {} belongs to cluster '{}', expected '{}'",
                    name, reported, expected
                )));
            }
        }

        let features = info
            .get("features")
            .map(|f| parse_features(f))
            .unwrap_or_default();

        let info_protocol = match info.get("build") {
            Some(build) => {
                let (major, minor, patch) = parse_build_version(build)?;
                InfoProtocol::from_version(major, minor, patch)
            }
            None => InfoProtocol::Modern,
        };

        Ok(Some((name.clone(), features, info_protocol)))
    }
}

/// Addresses for `host`; IP literals are used as-is
pub async fn resolve(host: &Host) -> Result<Vec<Host>> {
    if host.is_ip_literal() {
        return Ok(vec![host.clone()]);
    }

    let addrs = tokio::net::lookup_host((host.name.as_str(), host.port))
        .await
        .map_err(|e| ClusterError::connection_with_source("Failed to resolve host", Some(host.to_string()), e))?;

    let mut aliases: Vec<Host> = Vec::new();
    for addr in addrs {
        let alias = Host::with_tls_name(addr.ip().to_string(), host.port, host.tls_name.clone());
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    Ok(aliases)
}

fn parse_features(features: &str) -> HashSet<String> {
    features
        .split(';')
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_regex() -> Option<&'static Regex> {
    static BUILD: OnceLock<Option<Regex>> = OnceLock::new();
    BUILD
        .get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+).*").ok())
        .as_ref()
}

/// `major.minor.patch` prefix of a server build string
pub fn parse_build_version(build: &str) -> Result<(u32, u32, u32)> {
    let invalid = || ClusterError::parse(format!("Invalid build version string in info: {}", build));

    let caps = build_regex()
        .and_then(|re| re.captures(build))
        .ok_or_else(invalid)?;
    let field = |i: usize| -> Result<u32> {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .ok_or_else(invalid)
    };

    Ok((field(1)?, field(2)?, field(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_version() {
        assert_eq!(parse_build_version("6.1.0.3").unwrap(), (6, 1, 0));
        assert_eq!(parse_build_version("2.6.6").unwrap(), (2, 6, 6));
        assert_eq!(parse_build_version("3.15.1-rc2").unwrap(), (3, 15, 1));
    }

    #[test]
    fn test_parse_build_version_rejects_garbage() {
        let err = parse_build_version("unknown").unwrap_err();
        assert_eq!(err.category(), "parse");
        assert!(parse_build_version("2.6").is_err());
        assert!(parse_build_version("").is_err());
    }

    #[test]
    fn test_parse_features() {
        let features = parse_features("peers;cdt-list;;float");
        assert_eq!(features.len(), 3);
        assert!(features.contains("peers"));
        assert!(!features.contains(""));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal_skips_dns() {
        let host = Host::with_tls_name("10.1.2.3", 3000, Some("tls".into()));
        let aliases = resolve(&host).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].tls_name.as_deref(), Some("tls"));
    }

    #[tokio::test]
    async fn test_resolve_localhost_keeps_port_and_tls_name() {
        let host = Host::with_tls_name("localhost", 3100, Some("db".into()));
        let aliases = resolve(&host).await.unwrap();
        assert!(!aliases.is_empty());
        assert!(aliases.iter().all(|a| a.port == 3100 && a.tls_name.as_deref() == Some("db")));
    }
}
