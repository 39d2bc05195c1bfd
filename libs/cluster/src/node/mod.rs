//! Server Node
//!
//! One server process as seen by the client: its stable identity, the
//! addresses it answers on, a health score and the per-cycle bookkeeping the
//! tend loop uses to decide whether the node stays in the cluster.
//!
//! All counters are atomics. Only the tend worker mutates them, except
//! `active`, which request code may also clear after a hard transport error.

use crate::host::Host;
use crate::partition::InfoProtocol;
use crate::pool::{ConnectionFactory, ConnectionPool, PoolStats};
use crate::transport::Connection;
use crate::Result;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod generation;
pub(crate) mod refresh;
pub mod validator;

pub use generation::Generation;
pub use validator::{NodeIdentity, NodeValidator};

/// Health of a node that answered its last refresh
pub const FULL_HEALTH: i32 = 100;

/// Server node
pub struct Node {
    name: String,
    host: Host,
    aliases: ArcSwap<Vec<Host>>,
    features: HashSet<String>,
    info_protocol: InfoProtocol,

    health: AtomicI32,
    active: AtomicBool,
    reference_count: AtomicUsize,
    responded: AtomicBool,
    failures: AtomicUsize,
    peers_count: AtomicUsize,
    partition_generation: Mutex<Generation>,
    peers_generation: Mutex<Generation>,

    pool: ConnectionPool,
}

impl Node {
    pub fn new(identity: NodeIdentity, factory: Arc<ConnectionFactory>, pool_capacity: usize) -> Self {
        let NodeIdentity {
            name,
            host,
            mut aliases,
            features,
            info_protocol,
        } = identity;

        if !aliases.contains(&host) {
            aliases.push(host.clone());
        }

        Self {
            pool: ConnectionPool::new(host.clone(), factory, pool_capacity),
            name,
            host,
            aliases: ArcSwap::from_pointee(aliases),
            features,
            info_protocol,
            health: AtomicI32::new(FULL_HEALTH),
            active: AtomicBool::new(true),
            reference_count: AtomicUsize::new(0),
            responded: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
            peers_count: AtomicUsize::new(0),
            partition_generation: Mutex::new(Generation::new()),
            peers_generation: Mutex::new(Generation::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address connections are dialed to
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Snapshot of every address this node answers on
    pub fn aliases(&self) -> Arc<Vec<Host>> {
        self.aliases.load_full()
    }

    /// Add `host` to the alias set; false if it was already there
    pub fn add_alias(&self, host: Host) -> bool {
        let mut added = false;
        self.aliases.rcu(|current| {
            if current.contains(&host) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = Vec::clone(current);
                next.push(host.clone());
                Arc::new(next)
            }
        });
        added
    }

    pub fn features(&self) -> &HashSet<String> {
        &self.features
    }

    pub fn supports_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn info_protocol(&self) -> InfoProtocol {
        self.info_protocol
    }

    // Health

    pub fn health(&self) -> i32 {
        self.health.load(Ordering::Acquire)
    }

    /// One step towards unhealthy; never drops below zero
    pub fn decrease_health(&self) {
        let _ = self
            .health
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| Some((h - 1).max(0)));
    }

    pub fn restore_health(&self) {
        self.health.store(FULL_HEALTH, Ordering::Release);
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health() <= 0
    }

    // Lifecycle

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Retire the node; there is no way back
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    // Per-cycle bookkeeping

    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    pub fn increase_reference_count(&self) {
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    pub(crate) fn set_responded(&self, responded: bool) {
        self.responded.store(responded, Ordering::Release);
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_failures(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Peers (or friends) listed by this node's last discovery reply
    pub fn peers_count(&self) -> usize {
        self.peers_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_peers_count(&self, count: usize) {
        self.peers_count.store(count, Ordering::Release);
    }

    pub fn partition_changed(&self) -> bool {
        self.partition_generation.lock().changed()
    }

    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.lock().number()
    }

    pub fn peers_generation(&self) -> i64 {
        self.peers_generation.lock().number()
    }

    /// Clear the per-cycle state before a tend cycle
    pub fn reset(&self) {
        self.reference_count.store(0, Ordering::Release);
        self.responded.store(false, Ordering::Release);
        self.partition_generation.lock().reset_changed();
    }

    // Connections

    /// Borrow a connection from this node's pool
    pub async fn get_connection(&self, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        self.pool.acquire(timeout).await
    }

    /// Give a connection back; it is closed if this node has been retired
    pub async fn put_connection(&self, mut conn: Box<dyn Connection>) {
        if self.is_active() {
            self.pool.release(conn).await;
        } else {
            self.pool.close_connection(conn.as_mut()).await;
        }
    }

    /// Retire the node and close its idle connections
    pub async fn close(&self) {
        self.set_inactive();
        self.pool.drain().await;
        debug!(node = %self.name, "Node closed");
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.host)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .field("health", &self.health())
            .field("reference_count", &self.reference_count())
            .field("responded", &self.responded())
            .finish()
    }
}
