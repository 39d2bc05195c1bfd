//! Per-cycle node refresh steps
//!
//! Each step borrows a pooled connection with the short tend timeout. A step
//! that fails closes its connection instead of returning it, degrades the
//! node's health and bumps its failure counter; the error goes back to the
//! cycle driver, which records it and moves on to the next node.

use super::Node;
use crate::cluster::Cluster;
use crate::host::Host;
use crate::peers::{parse_peers, Peers};
use crate::transport::Connection;
use crate::{ClusterError, Result};
use client_config::defaults::TEND_REQUEST_TIMEOUT_MS;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TEND_REQUEST_TIMEOUT: Duration = Duration::from_millis(TEND_REQUEST_TIMEOUT_MS);

const INFO_PEERS: [&str; 4] = ["node", "partition-generation", "cluster-name", "peers-generation"];
const INFO_SERVICES: [&str; 4] = ["node", "partition-generation", "cluster-name", "services"];

const PEERS_TLS: &str = "peers-tls-std";
const PEERS_CLEAR: &str = "peers-clear-std";

impl Node {
    /// Check identity and generations; in legacy mode also walk the friend list
    pub(crate) async fn refresh_info(self: &Arc<Self>, cluster: &Cluster, peers: &mut Peers) -> Result<()> {
        let mut conn = match self.get_connection(Some(TEND_REQUEST_TIMEOUT)).await {
            Ok(conn) => conn,
            Err(e) => {
                self.info_failed(peers, &e);
                return Err(e);
            }
        };

        match self.exchange_info(conn.as_mut(), cluster, peers).await {
            Ok(()) => {
                self.restore_health();
                self.set_responded(true);
                peers.refresh_count += 1;
                self.reset_failures();
                self.put_connection(conn).await;
                Ok(())
            }
            Err(e) => {
                self.pool.close_connection(conn.as_mut()).await;
                self.info_failed(peers, &e);
                Err(e)
            }
        }
    }

    async fn exchange_info(
        self: &Arc<Self>,
        conn: &mut dyn Connection,
        cluster: &Cluster,
        peers: &mut Peers,
    ) -> Result<()> {
        let commands: &[&str] = if peers.use_peers { &INFO_PEERS } else { &INFO_SERVICES };
        let info = cluster.info_client().request(conn, commands).await?;

        self.verify_name(&info)?;
        self.verify_cluster_name(&info, cluster.cluster_name())?;
        self.verify_partition_generation(&info)?;

        if peers.use_peers {
            self.verify_peers_generation(&info, peers)?;
        } else {
            self.refresh_friends(&info, cluster, peers).await;
        }
        Ok(())
    }

    fn verify_name(&self, info: &HashMap<String, String>) -> Result<()> {
        match info.get("node").filter(|n| !n.is_empty()) {
            None => Err(ClusterError::invalid_node(format!("Node {} reported an empty name", self.name))),
            Some(reported) if *reported != self.name => {
                self.set_inactive();
                Err(ClusterError::invalid_node(format!(
                    "Node name has changed. Old={} New={}",
                    self.name, reported
                )))
            }
            Some(_) => Ok(()),
        }
    }

    fn verify_cluster_name(&self, info: &HashMap<String, String>, expected: Option<&str>) -> Result<()> {
        let Some(expected) = expected else {
            return Ok(());
        };

        let reported = info.get("cluster-name").map(String::as_str).unwrap_or_default();
        if reported != expected {
            self.set_inactive();
            return Err(ClusterError::invalid_node(format!(
                "Cluster name does not match. expected: {}, got: {}",
                expected, reported
            )));
        }
        Ok(())
    }

    fn verify_partition_generation(&self, info: &HashMap<String, String>) -> Result<()> {
        let generation = parse_generation(info, "partition-generation")?;

        let mut current = self.partition_generation.lock();
        current.update(generation);
        if current.changed() {
            info!(node = %self.name, generation, "Partition generation changed");
        }
        Ok(())
    }

    fn verify_peers_generation(&self, info: &HashMap<String, String>, peers: &mut Peers) -> Result<()> {
        let generation = parse_generation(info, "peers-generation")?;

        if self.peers_generation.lock().number() != generation {
            info!(node = %self.name, generation, "Peers generation changed");
            peers.generation_changed = true;
        }
        Ok(())
    }

    /// Legacy discovery: `services` lists `host:port` entries
    async fn refresh_friends(&self, info: &HashMap<String, String>, cluster: &Cluster, peers: &mut Peers) {
        let services = info.get("services").map(String::as_str).unwrap_or_default();
        if services.is_empty() {
            self.set_peers_count(0);
            return;
        }

        let friends: Vec<&str> = services.split(';').filter(|f| !f.is_empty()).collect();
        self.set_peers_count(friends.len());

        for friend in friends {
            let host = match parse_friend(friend) {
                Ok(host) => host,
                Err(e) => {
                    warn!(node = %self.name, friend, error = %e, "Ignoring malformed friend");
                    continue;
                }
            };

            if let Some(node) = cluster.find_alias(&host) {
                node.increase_reference_count();
            } else if !peers.hosts.contains(&host) {
                cluster.admit(peers, None, std::slice::from_ref(&host)).await;
            }
        }
    }

    /// Fetch the peer list and admit every peer not known yet
    pub(crate) async fn refresh_peers(self: &Arc<Self>, cluster: &Cluster, peers: &mut Peers) -> Result<()> {
        if self.failures() > 0 || !self.is_active() {
            return Ok(());
        }

        let mut conn = match self.get_connection(Some(TEND_REQUEST_TIMEOUT)).await {
            Ok(conn) => conn,
            Err(e) => {
                self.refresh_failed(&e);
                return Err(e);
            }
        };

        let command = if cluster.tls_enabled() { PEERS_TLS } else { PEERS_CLEAR };
        let fetched = async {
            let info = cluster.info_client().request(conn.as_mut(), &[command]).await?;
            let reply = info
                .get(command)
                .ok_or_else(|| ClusterError::parse(format!("Missing '{}' in info response", command)))?;
            parse_peers(reply, self.host.port)
        }
        .await;

        let list = match fetched {
            Ok(list) => {
                self.put_connection(conn).await;
                list
            }
            Err(e) => {
                self.pool.close_connection(conn.as_mut()).await;
                self.refresh_failed(&e);
                return Err(e);
            }
        };

        self.set_peers_count(list.peers.len());

        let mut all_validated = true;
        for peer in &list.peers {
            if !cluster.admit(peers, Some(&peer.node_name), &peer.hosts).await {
                all_validated = false;
            }
        }

        // A peer left unresolved must be retried next cycle
        if all_validated {
            self.peers_generation.lock().set(list.generation);
        }

        peers.peers = list.peers;
        peers.refresh_count += 1;
        Ok(())
    }

    /// Merge this node's partition ownership into the cluster map
    pub(crate) async fn refresh_partitions(self: &Arc<Self>, cluster: &Cluster, peers: &Peers) -> Result<()> {
        // An isolated node must not claim every partition
        if self.failures() > 0 || !self.is_active() || (self.peers_count() == 0 && peers.refresh_count > 1) {
            debug!(node = %self.name, "Skipping partition refresh");
            return Ok(());
        }

        let Some(tokenizer) = cluster.tokenizer(self.info_protocol) else {
            debug!(node = %self.name, protocol = ?self.info_protocol, "No partition tokenizer, skipping partition refresh");
            return Ok(());
        };

        let mut conn = match self.get_connection(Some(TEND_REQUEST_TIMEOUT)).await {
            Ok(conn) => conn,
            Err(e) => {
                self.refresh_failed(&e);
                return Err(e);
            }
        };

        let existing = cluster.partitions();
        match tokenizer.update(conn.as_mut(), self, &existing).await {
            Ok(updated) => {
                self.put_connection(conn).await;
                if let Some(map) = updated {
                    cluster.set_partitions(map);
                    debug!(node = %self.name, "Partitions updated");
                }
                Ok(())
            }
            Err(e) => {
                self.pool.close_connection(conn.as_mut()).await;
                self.refresh_failed(&e);
                Err(e)
            }
        }
    }

    fn info_failed(&self, peers: &mut Peers, error: &ClusterError) {
        // A silent node may have left; force peers refresh and removal checks
        if peers.use_peers {
            peers.generation_changed = true;
        }
        self.refresh_failed(error);
    }

    fn refresh_failed(&self, error: &ClusterError) {
        self.decrease_health();
        self.record_failure();
        warn!(
            node = %self.name,
            host = %self.host,
            category = error.category(),
            error = %error,
            "Node refresh failed"
        );
    }
}

fn parse_generation(info: &HashMap<String, String>, key: &str) -> Result<i64> {
    let value = info
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ClusterError::parse(format!("{} is empty", key)))?;

    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ClusterError::parse(format!("Invalid {} '{}'", key, value)))
}

fn parse_friend(friend: &str) -> Result<Host> {
    let (name, port) = friend
        .rsplit_once(':')
        .ok_or_else(|| ClusterError::parse(format!("Friend '{}' has no port", friend)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ClusterError::parse(format!("Invalid port in friend '{}'", friend)))?;
    if name.is_empty() {
        return Err(ClusterError::parse(format!("Friend '{}' has no host", friend)));
    }
    Ok(Host::new(name, port))
}
