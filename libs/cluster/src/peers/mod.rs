//! Per-cycle discovery state
//!
//! A fresh [`Peers`] working set is built at the start of every tend cycle
//! and dropped at its end. It collects what the cycle's discovery replies
//! revealed and the nodes created from them.

use crate::host::Host;
use crate::node::Node;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub mod parse;

pub use parse::{parse_peers, PeerList};

/// One entry of a peer list
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub node_name: String,
    pub tls_name: Option<String>,
    pub hosts: Vec<Host>,
}

/// Discovery working set for one tend cycle
#[derive(Debug)]
pub struct Peers {
    /// Peers listed by the last node refreshed
    pub peers: Vec<Peer>,
    /// Hosts already tried this cycle
    pub hosts: HashSet<Host>,
    /// Nodes created this cycle, by name
    pub nodes: HashMap<String, Arc<Node>>,
    /// Successful info and peers refreshes this cycle
    pub refresh_count: usize,
    /// Peers protocol (true) or legacy services list (false)
    pub use_peers: bool,
    pub generation_changed: bool,
}

impl Peers {
    pub fn new(use_peers: bool) -> Self {
        Self {
            peers: Vec::new(),
            hosts: HashSet::new(),
            nodes: HashMap::new(),
            refresh_count: 0,
            use_peers,
            generation_changed: false,
        }
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }
}

impl Default for Peers {
    fn default() -> Self {
        Self::new(true)
    }
}
