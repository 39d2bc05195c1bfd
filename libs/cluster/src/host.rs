//! Dial targets
//!
//! A [`Host`] names one address a node may be reached at. Two hosts are the
//! same target when name and port agree; the TLS name only tells the TLS
//! layer which certificate identity to expect.

use crate::{ClusterError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Server address with optional TLS identity
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub port: u16,
    pub tls_name: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    pub fn with_tls_name(name: impl Into<String>, port: u16, tls_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name,
        }
    }

    /// Parse `name[:tls_name][:port]` entries separated by commas.
    ///
    /// A second field made only of digits with no third field is the port.
    pub fn parse(hosts: &str, default_port: u16) -> Result<Vec<Host>> {
        hosts
            .split(',')
            .map(|entry| Self::parse_one(entry.trim(), default_port))
            .collect()
    }

    fn parse_one(entry: &str, default_port: u16) -> Result<Host> {
        let mut fields = entry.split(':');
        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(ClusterError::parse(format!("Empty host name in '{}'", entry)));
        }

        let mut tls_name = fields.next().map(str::to_string);
        let mut port = fields.next().map(str::to_string);
        if fields.next().is_some() {
            return Err(ClusterError::parse(format!("Too many fields in host '{}'", entry)));
        }

        if port.is_none() && tls_name.as_deref().map_or(false, is_all_digits) {
            port = tls_name.take();
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| ClusterError::parse(format!("Invalid port '{}' in host '{}'", p, entry)))?,
            None => default_port,
        };

        Ok(Host {
            name: name.to_string(),
            port,
            tls_name: tls_name.filter(|t| !t.is_empty()),
        })
    }

    /// Literal IP addresses skip name resolution
    pub fn is_ip_literal(&self) -> bool {
        self.name.parse::<IpAddr>().is_ok()
    }
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_name_tls_port() {
        let hosts = Host::parse("192.168.1.10:cert1:3002", 3000).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "192.168.1.10");
        assert_eq!(hosts[0].tls_name.as_deref(), Some("cert1"));
        assert_eq!(hosts[0].port, 3002);
    }

    #[test]
    fn test_parse_multiple_hosts() {
        let hosts = Host::parse("host1:3000,host2:3000", 3000).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "host1");
        assert_eq!(hosts[0].tls_name, None);
        assert_eq!(hosts[0].port, 3000);
        assert_eq!(hosts[1].name, "host2");
    }

    #[test]
    fn test_parse_tls_name_without_port() {
        let hosts = Host::parse("host1:tls_name", 3000).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "host1");
        assert_eq!(hosts[0].tls_name.as_deref(), Some("tls_name"));
        assert_eq!(hosts[0].port, 3000);
    }

    #[test]
    fn test_parse_name_only_uses_default_port() {
        let hosts = Host::parse("db.local", 4000).unwrap();
        assert_eq!(hosts[0].port, 4000);
        assert_eq!(hosts[0].tls_name, None);
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(Host::parse("host1:tls:notaport", 3000).is_err());
        assert!(Host::parse("host1:tls:70000", 3000).is_err());
        assert!(Host::parse("", 3000).is_err());
    }

    #[test]
    fn test_equality_ignores_tls_name() {
        let a = Host::with_tls_name("10.0.0.1", 3000, Some("a".into()));
        let b = Host::new("10.0.0.1", 3000);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&Host::new("10.0.0.1", 3001)));
    }

    #[test]
    fn test_ip_literal_detection() {
        assert!(Host::new("127.0.0.1", 3000).is_ip_literal());
        assert!(Host::new("::1", 3000).is_ip_literal());
        assert!(!Host::new("localhost", 3000).is_ip_literal());
    }

    #[test]
    fn test_display() {
        assert_eq!(Host::new("10.0.0.1", 3000).to_string(), "10.0.0.1:3000");
    }

    proptest! {
        #[test]
        fn parse_never_panics(input in "\\PC*") {
            let _ = Host::parse(&input, 3000);
        }

        #[test]
        fn parse_keeps_one_host_per_entry(names in prop::collection::vec("[a-z][a-z0-9]{0,8}", 1..5), port in 1u16..) {
            let joined = names
                .iter()
                .map(|n| format!("{}:{}", n, port))
                .collect::<Vec<_>>()
                .join(",");
            let hosts = Host::parse(&joined, 3000).unwrap();
            prop_assert_eq!(hosts.len(), names.len());
            for (host, name) in hosts.iter().zip(&names) {
                prop_assert_eq!(&host.name, name);
                prop_assert_eq!(host.port, port);
            }
        }
    }
}
