//! Tend cycle
//!
//! One cycle runs to completion before the next starts:
//!
//! 1. seed when the node list is empty
//! 2. reset per-cycle node state
//! 3. info refresh on every node
//! 4. peers refresh on every node when any peers generation moved
//! 5. partitions refresh on nodes whose partition generation moved
//! 6. removal decision, then add/remove in one snapshot swap
//! 7. features, listeners and a summary log when membership changed
//!
//! Failures are per node and per step; they are collected into the
//! [`TendReport`] and never abort the cycle.

use super::removal::find_nodes_to_remove;
use super::Cluster;
use crate::host::Host;
use crate::node::{Node, NodeIdentity};
use crate::peers::Peers;
use crate::{ClusterError, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

/// Refresh stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshStep {
    Info,
    Peers,
    Partitions,
}

impl fmt::Display for RefreshStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStep::Info => write!(f, "info"),
            RefreshStep::Peers => write!(f, "peers"),
            RefreshStep::Partitions => write!(f, "partitions"),
        }
    }
}

/// One failed refresh step
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    pub node: String,
    pub step: RefreshStep,
    pub category: &'static str,
    pub message: String,
}

/// Outcome of one tend cycle
#[derive(Debug, Clone, Default)]
pub struct TendReport {
    /// Nodes tended this cycle
    pub nodes: usize,
    /// Nodes whose info refresh succeeded
    pub responded: usize,
    pub failures: Vec<RefreshFailure>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TendReport {
    /// Membership changed this cycle
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    fn record(&mut self, node: &Node, step: RefreshStep, error: &ClusterError) {
        self.failures.push(RefreshFailure {
            node: node.name().to_string(),
            step,
            category: error.category(),
            message: error.to_string(),
        });
    }
}

impl Cluster {
    /// Run one tend cycle
    ///
    /// Serialized with the background worker; concurrent callers wait.
    pub async fn tend(&self) -> Result<TendReport> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        let _cycle = self.tend_lock.lock().await;
        // `close` may have run while this cycle waited for the lock
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        let mut report = TendReport::default();

        let mut nodes = self.nodes();
        if nodes.is_empty() {
            let seeded = self.seed_nodes().await;
            report.added.extend(seeded.iter().map(|n| n.name().to_string()));
            nodes = self.nodes();
        }
        report.nodes = nodes.len();

        // Peers protocol only when every node speaks it
        let use_peers = nodes.iter().all(|n| n.supports_feature("peers"));
        let mut peers = Peers::new(use_peers);

        for node in nodes.iter() {
            node.reset();
        }

        for node in nodes.iter() {
            if let Err(e) = node.refresh_info(self, &mut peers).await {
                report.record(node, RefreshStep::Info, &e);
            }
        }
        report.responded = nodes.iter().filter(|n| n.responded()).count();

        if peers.generation_changed {
            for node in nodes.iter() {
                if let Err(e) = node.refresh_peers(self, &mut peers).await {
                    report.record(node, RefreshStep::Peers, &e);
                }
            }
        }

        for node in nodes.iter() {
            if node.partition_changed() {
                if let Err(e) = node.refresh_partitions(self, &peers).await {
                    report.record(node, RefreshStep::Partitions, &e);
                }
            }
        }

        let to_remove = if peers.generation_changed || !peers.use_peers {
            find_nodes_to_remove(&nodes, peers.refresh_count, &self.partitions())
        } else {
            // Retired nodes go regardless of generations
            nodes.iter().filter(|n| !n.is_active()).cloned().collect()
        };
        let to_add: Vec<Arc<Node>> = peers.nodes.into_values().collect();

        if !to_remove.is_empty() || !to_add.is_empty() {
            self.apply_membership(&to_remove, &to_add).await;
            report.removed.extend(to_remove.iter().map(|n| n.name().to_string()));
            report.added.extend(to_add.iter().map(|n| n.name().to_string()));
        }

        if report.changed() {
            self.update_cluster_features();
            self.notify_cluster_config_changed();
            self.log_tend_stats();
        }

        Ok(report)
    }

    /// Validate the configured seeds and install the nodes they lead to
    async fn seed_nodes(&self) -> Vec<Arc<Node>> {
        let seeds = self.seeds();
        info!(seeds = seeds.len(), "Seeding the cluster");

        let validator = self.validator();
        let mut identities: Vec<NodeIdentity> = Vec::new();

        for seed in &seeds {
            let identity = match validator.validate(seed).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Seed validation failed");
                    continue;
                }
            };

            // A name may resolve to several servers; probe every address
            let others: Vec<Host> = identity
                .aliases
                .iter()
                .filter(|alias| **alias != identity.host)
                .cloned()
                .collect();
            let answered = identity.host.clone();
            merge_identity(
                &mut identities,
                NodeIdentity {
                    aliases: vec![answered],
                    ..identity
                },
            );

            for alias in others {
                match validator.validate(&alias).await {
                    Ok(identity) => merge_identity(&mut identities, identity),
                    Err(e) => warn!(seed = %seed, alias = %alias, error = %e, "Seed alias validation failed"),
                }
            }
        }

        let nodes: Vec<Arc<Node>> = identities
            .into_iter()
            .map(|identity| self.create_node(identity))
            .collect();

        if !nodes.is_empty() {
            self.apply_membership(&[], &nodes).await;
        }
        nodes
    }

    /// Resolve a peer (`expected` name known) or a legacy friend (host only)
    /// to a node. Returns false when no candidate host could be admitted.
    pub(crate) async fn admit(&self, peers: &mut Peers, expected: Option<&str>, hosts: &[Host]) -> bool {
        if let Some(name) = expected {
            if let Some(node) = self.find_node_by_name(name) {
                node.increase_reference_count();
                for host in hosts {
                    if node.add_alias(host.clone()) {
                        self.add_alias(host.clone(), &node);
                    }
                }
                return true;
            }
            if let Some(node) = peers.find_node_by_name(name) {
                node.increase_reference_count();
                for host in hosts {
                    node.add_alias(host.clone());
                }
                return true;
            }
        }

        let validator = self.validator();
        for host in hosts {
            if !peers.hosts.insert(host.clone()) {
                continue;
            }

            let identity = match validator.validate(host).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(host = %host, error = %e, "Add node failed");
                    continue;
                }
            };

            if let Some(name) = expected {
                if identity.name != name {
                    warn!(
                        host = %host,
                        expected = %name,
                        reported = %identity.name,
                        "Peer node name mismatch"
                    );
                    continue;
                }
            }

            if let Some(node) = peers.find_node_by_name(&identity.name) {
                node.add_alias(host.clone());
                return true;
            }

            if let Some(node) = self.find_node_by_name(&identity.name) {
                node.increase_reference_count();
                if node.add_alias(host.clone()) {
                    self.add_alias(host.clone(), &node);
                }
                return true;
            }

            let node = self.create_node(identity);
            peers.nodes.insert(node.name().to_string(), node);
            return true;
        }

        false
    }

    /// Drop `removed`, append `added`, in one snapshot swap
    async fn apply_membership(&self, removed: &[Arc<Node>], added: &[Arc<Node>]) {
        for node in added {
            self.register_aliases(node);
        }

        let current = self.nodes();
        let mut next: Vec<Arc<Node>> = current
            .iter()
            .filter(|node| !removed.iter().any(|r| Arc::ptr_eq(r, node)))
            .cloned()
            .collect();
        next.extend(added.iter().cloned());
        self.nodes.store(Arc::new(next));

        for node in added {
            info!(node = %node.name(), host = %node.host(), "Node added");
        }
        for node in removed {
            self.unregister_aliases(node);
            node.close().await;
            info!(node = %node.name(), host = %node.host(), "Node removed");
        }
    }

    /// Cluster features are the ones every node supports
    fn update_cluster_features(&self) {
        let nodes = self.nodes();
        let mut iter = nodes.iter();
        let features: HashSet<String> = match iter.next() {
            Some(first) => iter.fold(first.features().clone(), |acc, node| {
                acc.intersection(node.features()).cloned().collect()
            }),
            None => HashSet::new(),
        };
        self.features.store(Arc::new(features));
    }

    fn log_tend_stats(&self) {
        let count = self.nodes().len();
        let old = self.old_node_count.swap(count, Ordering::AcqRel);
        let diff = count as i64 - old as i64;
        let (noun, verb) = match (diff.unsigned_abs() == 1, diff > 0) {
            (true, true) => ("node has", "joined"),
            (true, false) => ("node has", "left"),
            (false, true) => ("nodes have", "joined"),
            (false, false) => ("nodes have", "left"),
        };
        info!(
            old_node_count = old,
            new_node_count = count,
            "Tend finished. {} {} {} the cluster",
            diff.unsigned_abs(),
            noun,
            verb
        );
    }
}

fn merge_identity(identities: &mut Vec<NodeIdentity>, identity: NodeIdentity) {
    match identities.iter_mut().find(|i| i.name == identity.name) {
        Some(existing) => {
            for alias in identity.aliases {
                if !existing.aliases.contains(&alias) {
                    existing.aliases.push(alias);
                }
            }
        }
        None => identities.push(identity),
    }
}
