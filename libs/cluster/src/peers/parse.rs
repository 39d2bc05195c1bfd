//! Peer list decoding
//!
//! Reply format of the `peers-*-std` info commands:
//!
//! ```text
//! generation,default_port,[[name,tls_name,[host[:port],...]],...]
//! ```
//!
//! `default_port` and `tls_name` may be empty. Host entries without a port
//! take `default_port`, or the port of the node that was asked.

use super::Peer;
use crate::host::Host;
use crate::{ClusterError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Decoded peer list reply
#[derive(Debug, Clone, PartialEq)]
pub struct PeerList {
    pub generation: i64,
    pub default_port: Option<u16>,
    pub peers: Vec<Peer>,
}

fn base_regex() -> Option<&'static Regex> {
    static BASE: OnceLock<Option<Regex>> = OnceLock::new();
    BASE.get_or_init(|| Regex::new(r"(\d+),(\d*),\[(.*)\]").ok())
        .as_ref()
}

/// Parse a peer list reply; `fallback_port` is the port of the node asked
pub fn parse_peers(response: &str, fallback_port: u16) -> Result<PeerList> {
    let caps = base_regex()
        .and_then(|re| re.captures(response))
        .ok_or_else(|| ClusterError::parse(format!("Malformed peers response: '{}'", response)))?;

    let (Some(generation), Some(port), Some(body)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        return Err(ClusterError::parse(format!("Malformed peers response: '{}'", response)));
    };

    let generation = generation
        .as_str()
        .parse::<i64>()
        .map_err(|_| ClusterError::parse(format!("Invalid peers generation '{}'", generation.as_str())))?;

    let default_port = match port.as_str() {
        "" => None,
        p => Some(
            p.parse::<u16>()
                .map_err(|_| ClusterError::parse(format!("Invalid peers default port '{}'", p)))?,
        ),
    };

    let port = default_port.unwrap_or(fallback_port);
    let peers = parse_peer_entries(body.as_str(), port)?;

    Ok(PeerList {
        generation,
        default_port,
        peers,
    })
}

fn parse_peer_entries(body: &str, port: u16) -> Result<Vec<Peer>> {
    let mut peers = Vec::new();
    if body.is_empty() {
        return Ok(peers);
    }

    let mut parser = StringParser::new(body);
    loop {
        peers.push(parse_peer(&mut parser, port)?);
        if parser.current() != Some(b',') {
            break;
        }
        parser.step();
    }

    if !parser.at_end() {
        return Err(parser.error("trailing characters after peer list"));
    }
    Ok(peers)
}

fn parse_peer(parser: &mut StringParser<'_>, port: u16) -> Result<Peer> {
    parser.expect(b'[')?;
    let node_name = parser.read_until(b',')?;
    if node_name.is_empty() {
        return Err(parser.error("empty node name"));
    }
    let tls_name = Some(parser.read_until(b',')?)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let hosts = parse_hosts(parser, tls_name.as_deref(), port)?;
    parser.expect(b']')?;

    Ok(Peer {
        node_name: node_name.to_string(),
        tls_name,
        hosts,
    })
}

fn parse_hosts(parser: &mut StringParser<'_>, tls_name: Option<&str>, port: u16) -> Result<Vec<Host>> {
    parser.expect(b'[')?;
    match parser.current() {
        Some(b']') => {
            parser.step();
            return Ok(Vec::new());
        }
        // Bracketed IPv6 literals are not supported
        Some(b'[') => return Err(parser.error("IPv6 host literals are not supported")),
        _ => {}
    }

    parser
        .read_until(b']')?
        .split(',')
        .map(|entry| parse_host(entry, tls_name, port))
        .collect()
}

fn parse_host(entry: &str, tls_name: Option<&str>, port: u16) -> Result<Host> {
    let mut fields = entry.split(':');
    let name = fields.next().unwrap_or_default();
    let host_port = fields.next();
    if name.is_empty() || fields.next().is_some() {
        return Err(ClusterError::parse(format!("Invalid peer host '{}'", entry)));
    }

    let port = match host_port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| ClusterError::parse(format!("Invalid port in peer host '{}'", entry)))?,
        None => port,
    };

    Ok(Host::with_tls_name(name, port, tls_name.map(str::to_string)))
}

/// Left-to-right scanner over an ASCII reply
struct StringParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> StringParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn current(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn step(&mut self) {
        self.pos += 1;
    }

    /// Consume `expected` or fail
    fn expect(&mut self, expected: u8) -> Result<()> {
        if self.current() == Some(expected) {
            self.step();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected as char)))
        }
    }

    /// Consume up to and including `delimiter`, returning what came before it
    fn read_until(&mut self, delimiter: u8) -> Result<&'a str> {
        let rest = self.input.as_bytes().get(self.pos..).unwrap_or_default();
        let offset = rest
            .iter()
            .position(|&b| b == delimiter)
            .ok_or_else(|| self.error(&format!("missing '{}'", delimiter as char)))?;

        let start = self.pos;
        self.pos += offset + 1;
        // Delimiters are ASCII so both ends sit on char boundaries
        self.input
            .get(start..start + offset)
            .ok_or_else(|| self.error("invalid UTF-8 boundary"))
    }

    fn error(&self, what: &str) -> ClusterError {
        ClusterError::parse(format!("Peers parse error at offset {}: {}", self.pos, what))
    }
}
