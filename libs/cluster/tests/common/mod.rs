//! In-memory server farm implementing the collaborator traits
//!
//! Servers are keyed by host. A connection "talks" to whichever server lives
//! at its host at request time, so tests can rename, kill or re-point a
//! server between tend cycles.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use client_config::{ClientPolicy, TlsOptions};
use cluster::{
    Authenticator, ClusterError, ClusterServices, Connection, Connector, Host, InfoClient, InfoProtocol,
    Node, PartitionMap, PartitionTokenizer, Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct FakeServer {
    pub name: String,
    pub build: String,
    pub features: Vec<String>,
    pub cluster_name: String,
    pub partition_generation: i64,
    pub peers_generation: i64,
    /// Reply to `peers-clear-std`
    pub peers: String,
    /// Reply to `services`
    pub services: String,
    pub alive: bool,
    /// Peer list served under `peers-tls-std` only
    pub peers_tls: bool,
    /// Added before every info reply
    pub delay: Duration,
    /// namespace -> owned partition ids
    pub partitions: Vec<(String, Vec<usize>)>,
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            build: "6.1.0.3".to_string(),
            features: vec!["peers".to_string(), "cdt-list".to_string()],
            cluster_name: "test-cluster".to_string(),
            partition_generation: 1,
            peers_generation: 1,
            peers: "1,,[]".to_string(),
            services: String::new(),
            alive: true,
            peers_tls: false,
            delay: Duration::ZERO,
            partitions: Vec::new(),
        }
    }

    /// Server without the peers protocol
    pub fn legacy(name: &str) -> Self {
        Self {
            features: vec!["cdt-list".to_string()],
            ..Self::new(name)
        }
    }

    pub fn owning(mut self, namespace: &str, ids: impl IntoIterator<Item = usize>) -> Self {
        self.partitions.push((namespace.to_string(), ids.into_iter().collect()));
        self
    }
}

/// `generation,,[[name,,[ip:port]],...]`
pub fn peers_reply(generation: i64, peers: &[(&str, &str)]) -> String {
    let body = peers
        .iter()
        .map(|(name, ip)| format!("[{},,[{}:{}]]", name, ip, PORT))
        .collect::<Vec<_>>()
        .join(",");
    format!("{},,[{}]", generation, body)
}

/// `ip:port;ip:port`
pub fn services_reply(ips: &[&str]) -> String {
    ips.iter()
        .map(|ip| format!("{}:{}", ip, PORT))
        .collect::<Vec<_>>()
        .join(";")
}

pub fn host(ip: &str) -> Host {
    Host::new(ip, PORT)
}

#[derive(Default)]
pub struct Farm {
    servers: Mutex<HashMap<Host, FakeServer>>,
    pub dials: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Farm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, ip: &str, server: FakeServer) {
        self.servers.lock().insert(host(ip), server);
    }

    pub fn update(&self, ip: &str, f: impl FnOnce(&mut FakeServer)) {
        if let Some(server) = self.servers.lock().get_mut(&host(ip)) {
            f(server);
        }
    }

    pub fn kill(&self, ip: &str) {
        self.update(ip, |s| s.alive = false);
    }

    /// Server at `host`; the TLS name does not take part in the lookup
    fn server(&self, host: &Host) -> Option<FakeServer> {
        let key = Host::new(host.name.clone(), host.port);
        self.servers.lock().get(&key).filter(|s| s.alive).cloned()
    }

    pub fn open_connections(&self) -> usize {
        self.dials.load(Ordering::SeqCst) - self.closes.load(Ordering::SeqCst)
    }

    /// Collaborators wired to this farm
    pub fn services(self: &Arc<Self>) -> ClusterServices {
        let tokenizer: Arc<dyn PartitionTokenizer> = Arc::new(FakeTokenizer { farm: self.clone() });
        ClusterServices::new()
            .with_connector(Arc::new(FakeConnector { farm: self.clone() }))
            .with_info_client(Arc::new(FakeInfo { farm: self.clone() }))
            .with_tokenizer(InfoProtocol::Modern, tokenizer.clone())
            .with_tokenizer(InfoProtocol::Legacy, tokenizer)
    }
}

/// Policy with a worker interval long enough that only explicit `tend()`
/// calls run after `connect`
pub fn test_policy() -> ClientPolicy {
    ClientPolicy {
        timeout_ms: 1_000,
        tend_interval_ms: 60_000,
        connection_queue_size: 4,
        ..ClientPolicy::default()
    }
}

pub struct FakeConnection {
    host: Host,
    open: bool,
    farm: Arc<Farm>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn write(&mut self, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self, _len: usize) -> Result<Bytes> {
        Err(ClusterError::connection("fake connections carry no bytes", Some(self.host.to_string())))
    }

    fn set_timeout(&mut self, _timeout: Duration) {}

    fn is_connected(&self) -> bool {
        self.open
    }

    fn host(&self) -> &Host {
        &self.host
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.farm.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeConnector {
    farm: Arc<Farm>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        host: &Host,
        _timeout: Duration,
        _tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Connection>> {
        if self.farm.server(host).is_none() {
            return Err(ClusterError::connection("Connection refused", Some(host.to_string())));
        }
        self.farm.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            host: host.clone(),
            open: true,
            farm: self.farm.clone(),
        }))
    }
}

pub struct FakeInfo {
    farm: Arc<Farm>,
}

#[async_trait]
impl InfoClient for FakeInfo {
    async fn request(
        &self,
        conn: &mut dyn Connection,
        commands: &[&str],
    ) -> Result<HashMap<String, String>> {
        let host = conn.host().clone();
        let server = self
            .farm
            .server(&host)
            .ok_or_else(|| ClusterError::connection("Connection reset", Some(host.to_string())))?;
        if !server.delay.is_zero() {
            tokio::time::sleep(server.delay).await;
        }

        let mut reply = HashMap::new();
        for command in commands {
            let value = match *command {
                "node" => server.name.clone(),
                "build" => server.build.clone(),
                "features" => server.features.join(";"),
                "cluster-name" => server.cluster_name.clone(),
                "partition-generation" => server.partition_generation.to_string(),
                "peers-generation" => server.peers_generation.to_string(),
                "services" => server.services.clone(),
                "peers-clear-std" if !server.peers_tls => server.peers.clone(),
                "peers-tls-std" if server.peers_tls => server.peers.clone(),
                _ => continue,
            };
            reply.insert(command.to_string(), value);
        }
        Ok(reply)
    }
}

pub struct FakeTokenizer {
    farm: Arc<Farm>,
}

#[async_trait]
impl PartitionTokenizer for FakeTokenizer {
    async fn update(
        &self,
        conn: &mut dyn Connection,
        node: &Arc<Node>,
        existing: &PartitionMap,
    ) -> Result<Option<PartitionMap>> {
        let host = conn.host().clone();
        let server = self
            .farm
            .server(&host)
            .ok_or_else(|| ClusterError::connection("Connection reset", Some(host.to_string())))?;

        if server.partitions.is_empty() {
            return Ok(None);
        }

        let mut map = existing.clone();
        for (namespace, ids) in &server.partitions {
            map.assign(namespace, ids.iter().copied(), node);
        }
        Ok(Some(map))
    }
}

/// Accepts only `hashed:<password>` for the configured secret
pub struct FakeAuthenticator {
    pub secret: String,
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(
        &self,
        _conn: &mut dyn Connection,
        _user: &str,
        hashed_password: &str,
    ) -> Result<()> {
        if hashed_password == self.hash_password(&self.secret) {
            Ok(())
        } else {
            Err(ClusterError::invalid_credentials("Not authenticated"))
        }
    }

    fn hash_password(&self, password: &str) -> String {
        format!("hashed:{}", password)
    }
}
