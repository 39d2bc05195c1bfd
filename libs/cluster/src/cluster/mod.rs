//! Cluster Topology Manager
//!
//! Owns the node list and the partition map, runs the tend cycle and answers
//! routing queries. Both collections are immutable snapshots behind
//! [`ArcSwap`]: the tend worker builds a new value and swaps it in, readers
//! load the current value and never block on the worker.
//!
//! ```text
//!   request path                     tend worker (one task)
//!   ------------                     ----------------------
//!   get_node(partition) --load-->  [nodes snapshot]  <--store-- tend()
//!   random_node()        --load-->  [partition map]   <--store--   |
//!   node.get_connection()                                          v
//!                                                      listeners notified
//! ```

use crate::auth::{Authenticator, Credentials};
use crate::host::Host;
use crate::info::{InfoClient, TextInfoClient};
use crate::node::{Node, NodeIdentity, NodeValidator};
use crate::partition::{InfoProtocol, Partition, PartitionMap, PartitionTokenizer};
use crate::pool::ConnectionFactory;
use crate::transport::{Connector, TcpConnector};
use crate::{ClusterError, Result};
use arc_swap::ArcSwap;
use client_config::ClientPolicy;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub mod removal;
pub mod tend;

pub use removal::find_nodes_to_remove;
pub use tend::{RefreshFailure, RefreshStep, TendReport};

/// Notified after every tend cycle that changed cluster membership
pub trait ClusterConfigListener: Send + Sync {
    fn on_cluster_config_changed(&self, cluster: &Cluster);
}

/// Collaborators the cluster talks to the servers through
#[derive(Clone)]
pub struct ClusterServices {
    pub connector: Arc<dyn Connector>,
    pub info: Arc<dyn InfoClient>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub legacy_tokenizer: Option<Arc<dyn PartitionTokenizer>>,
    pub modern_tokenizer: Option<Arc<dyn PartitionTokenizer>>,
}

impl ClusterServices {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(TcpConnector::new()),
            info: Arc::new(TextInfoClient::new()),
            authenticator: None,
            legacy_tokenizer: None,
            modern_tokenizer: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_info_client(mut self, info: Arc<dyn InfoClient>) -> Self {
        self.info = info;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Tokenizer used for nodes speaking `protocol`
    pub fn with_tokenizer(mut self, protocol: InfoProtocol, tokenizer: Arc<dyn PartitionTokenizer>) -> Self {
        match protocol {
            InfoProtocol::Legacy => self.legacy_tokenizer = Some(tokenizer),
            InfoProtocol::Modern => self.modern_tokenizer = Some(tokenizer),
        }
        self
    }

    pub fn tokenizer(&self, protocol: InfoProtocol) -> Option<&Arc<dyn PartitionTokenizer>> {
        match protocol {
            InfoProtocol::Legacy => self.legacy_tokenizer.as_ref(),
            InfoProtocol::Modern => self.modern_tokenizer.as_ref(),
        }
    }
}

impl Default for ClusterServices {
    fn default() -> Self {
        Self::new()
    }
}

/// Client view of a server cluster
pub struct Cluster {
    policy: ClientPolicy,
    services: ClusterServices,
    factory: Arc<ConnectionFactory>,

    seeds: Mutex<Vec<Host>>,
    nodes: ArcSwap<Vec<Arc<Node>>>,
    partitions: ArcSwap<PartitionMap>,
    aliases: Mutex<HashMap<Host, Arc<Node>>>,
    features: ArcSwap<HashSet<String>>,
    listeners: ArcSwap<Vec<Arc<dyn ClusterConfigListener>>>,

    node_index: AtomicUsize,
    old_node_count: AtomicUsize,
    /// Set once stabilization produced at least one node
    open: AtomicBool,
    /// Set by `close`; no tend cycle starts afterwards
    shut_down: AtomicBool,

    tend_lock: tokio::sync::Mutex<()>,
    tend_task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Build a cluster for `seeds`; nothing is dialed until [`Cluster::connect`]
    pub fn new(policy: ClientPolicy, seeds: Vec<Host>, services: ClusterServices) -> Result<Arc<Self>> {
        policy
            .validate()
            .map_err(|e| ClusterError::configuration(e.to_string(), None))?;

        let credentials = if policy.requires_authentication() {
            let authenticator = services.authenticator.as_ref().ok_or_else(|| {
                ClusterError::configuration("User configured but no authenticator provided", Some("user"))
            })?;
            let user = policy.user.clone().unwrap_or_default();
            let password = policy.password.as_deref().unwrap_or_default();
            Some(Credentials::new(user, authenticator.hash_password(password)))
        } else {
            None
        };

        let factory = ConnectionFactory::new(
            services.connector.clone(),
            services.authenticator.clone(),
            credentials,
            policy.tls.clone(),
            policy.timeout(),
        )?;

        let mut seeds = seeds;
        if policy.tls_enabled() {
            for seed in seeds.iter_mut() {
                if seed.tls_name.is_none() {
                    seed.tls_name = Some(seed.name.clone());
                }
            }
        }

        Ok(Arc::new(Self {
            policy,
            services,
            factory: Arc::new(factory),
            seeds: Mutex::new(seeds),
            nodes: ArcSwap::from_pointee(Vec::new()),
            partitions: ArcSwap::from_pointee(PartitionMap::new()),
            aliases: Mutex::new(HashMap::new()),
            features: ArcSwap::from_pointee(HashSet::new()),
            listeners: ArcSwap::from_pointee(Vec::new()),
            node_index: AtomicUsize::new(rand::random::<usize>()),
            old_node_count: AtomicUsize::new(0),
            open: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            tend_lock: tokio::sync::Mutex::new(()),
            tend_task: Mutex::new(None),
        }))
    }

    /// Tend until membership settles, then start the background worker
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ClusterError::Closed);
        }

        self.wait_till_stabilized().await;

        if self.policy.fail_if_not_connected && !self.connected() {
            return Err(ClusterError::server_not_available(format!(
                "No node reachable from seeds {:?} within {}ms",
                self.seeds()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
                self.policy.timeout_ms
            )));
        }

        self.launch_tend_task();
        info!(nodes = self.nodes().len(), "Cluster initialized and ready to be used");
        Ok(())
    }

    async fn wait_till_stabilized(&self) {
        let stabilize = async {
            let mut count: Option<usize> = None;
            loop {
                if let Err(e) = self.tend().await {
                    error!(error = %e, "Tend failed during stabilization");
                }

                let current = self.nodes().len();
                if count == Some(current) {
                    break;
                }
                count = Some(current);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };

        if tokio::time::timeout(self.policy.timeout(), stabilize).await.is_err() {
            debug!(timeout_ms = self.policy.timeout_ms, "Cluster did not stabilize before timeout");
        }

        if !self.nodes().is_empty() {
            self.open.store(true, Ordering::Release);
        }
    }

    fn launch_tend_task(self: &Arc<Self>) {
        let weak: Weak<Cluster> = Arc::downgrade(self);
        let interval = self.policy.tend_interval();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(cluster) = weak.upgrade() else {
                    break;
                };
                if cluster.shut_down.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = cluster.tend().await {
                    error!(error = %e, "Tend cycle failed");
                }
            }
            debug!("Tend worker stopped");
        });

        if let Some(previous) = self.tend_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop tending and close every node's connections
    pub async fn close(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.open.store(false, Ordering::Release);

        if let Some(handle) = self.tend_task.lock().take() {
            handle.abort();
        }

        // Let an in-flight cycle commit first so its new nodes are closed too
        let _cycle = self.tend_lock.lock().await;
        for node in self.nodes().iter() {
            node.close().await;
        }
        info!("Cluster closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// At least one node and not closed
    pub fn connected(&self) -> bool {
        !self.nodes().is_empty() && self.open.load(Ordering::Acquire)
    }

    // Seeds

    pub fn add_seeds(&self, hosts: impl IntoIterator<Item = Host>) {
        self.seeds.lock().extend(hosts);
    }

    pub fn seeds(&self) -> Vec<Host> {
        self.seeds.lock().clone()
    }

    // Topology queries

    /// Current node snapshot
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    /// Current partition map snapshot
    pub fn partitions(&self) -> Arc<PartitionMap> {
        self.partitions.load_full()
    }

    /// Owner of `partition` when known and active, else any active node
    pub fn get_node(&self, partition: &Partition) -> Result<Arc<Node>> {
        if let Some(node) = self.partitions.load().owner(partition) {
            if node.is_active() {
                return Ok(node);
            }
        }
        self.random_node()
    }

    /// Next active node in round-robin order
    pub fn random_node(&self) -> Result<Arc<Node>> {
        let nodes = self.nodes.load();
        let len = nodes.len();
        for _ in 0..len {
            let index = self.node_index.fetch_add(1, Ordering::Relaxed) % len;
            let node = &nodes[index];
            if node.is_active() {
                return Ok(Arc::clone(node));
            }
        }
        Err(ClusterError::NoAvailableNode)
    }

    pub fn get_node_by_name(&self, name: &str) -> Result<Arc<Node>> {
        self.find_node_by_name(name)
            .ok_or_else(|| ClusterError::invalid_node(format!("Node {} not found", name)))
    }

    pub(crate) fn find_node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.load().iter().find(|n| n.name() == name).cloned()
    }

    pub fn find_alias(&self, host: &Host) -> Option<Arc<Node>> {
        self.aliases.lock().get(host).cloned()
    }

    /// Feature supported by every node
    pub fn supports_feature(&self, feature: &str) -> bool {
        self.features.load().contains(feature)
    }

    pub fn features(&self) -> Arc<HashSet<String>> {
        self.features.load_full()
    }

    pub fn tls_enabled(&self) -> bool {
        self.factory.tls().is_some()
    }

    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// Run info `commands` against any active node
    pub async fn request_info(&self, commands: &[&str]) -> Result<HashMap<String, String>> {
        let node = self.random_node()?;
        let mut conn = node.get_connection(Some(self.policy.timeout())).await?;
        match self.services.info.request(conn.as_mut(), commands).await {
            Ok(info) => {
                node.put_connection(conn).await;
                Ok(info)
            }
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    /// Use `password` for new connections when `user` is the configured user
    pub fn change_password(&self, user: &str, password: &str) -> bool {
        self.factory.change_password(user, password)
    }

    // Listeners

    pub fn add_cluster_config_change_listener(&self, listener: Arc<dyn ClusterConfigListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn remove_cluster_config_change_listener(&self, listener: &Arc<dyn ClusterConfigListener>) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|l| !Arc::ptr_eq(*l, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    fn notify_cluster_config_changed(&self) {
        let listeners = self.listeners.load();
        for listener in listeners.iter() {
            listener.on_cluster_config_changed(self);
        }
    }

    // Membership plumbing used by the tend cycle

    pub(crate) fn info_client(&self) -> &dyn InfoClient {
        self.services.info.as_ref()
    }

    pub(crate) fn tokenizer(&self, protocol: InfoProtocol) -> Option<&Arc<dyn PartitionTokenizer>> {
        self.services.tokenizer(protocol)
    }

    pub(crate) fn cluster_name(&self) -> Option<&str> {
        self.policy.cluster_name.as_deref().filter(|n| !n.is_empty())
    }

    pub(crate) fn validator(&self) -> NodeValidator<'_> {
        NodeValidator::new(
            &self.factory,
            self.services.info.as_ref(),
            self.policy.timeout(),
            self.cluster_name(),
        )
    }

    pub(crate) fn create_node(&self, identity: NodeIdentity) -> Arc<Node> {
        Arc::new(Node::new(
            identity,
            Arc::clone(&self.factory),
            self.policy.connection_queue_size,
        ))
    }

    pub(crate) fn set_partitions(&self, partitions: PartitionMap) {
        self.partitions.store(Arc::new(partitions));
    }

    pub(crate) fn add_alias(&self, host: Host, node: &Arc<Node>) {
        debug!(host = %host, node = %node.name(), "Adding alias");
        self.aliases.lock().insert(host, Arc::clone(node));
    }

    fn register_aliases(&self, node: &Arc<Node>) {
        let aliases = node.aliases();
        let mut map = self.aliases.lock();
        for host in aliases.iter() {
            map.insert(host.clone(), Arc::clone(node));
        }
    }

    fn unregister_aliases(&self, node: &Arc<Node>) {
        let aliases = node.aliases();
        let mut map = self.aliases.lock();
        for host in aliases.iter() {
            // Only drop entries that still point at this node
            if map.get(host).map_or(false, |n| Arc::ptr_eq(n, node)) {
                debug!(host = %host, node = %node.name(), "Removing alias");
                map.remove(host);
            }
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes())
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if let Some(handle) = self.tend_task.get_mut().take() {
            handle.abort();
        }
    }
}
