//! Per-node Connection Pool
//!
//! Bounded cache of established, authenticated connections to one node.
//! Connections are created lazily through the shared [`ConnectionFactory`]
//! and are never handed out twice: `acquire` moves one out of the idle queue,
//! `release` moves it back (or closes it when the queue is full).
//!
//! The idle queue lock is never held across an `.await`.

use crate::auth::{Authenticator, Credentials};
use crate::host::Host;
use crate::transport::{Connection, Connector};
use crate::{ClusterError, Result};
use client_config::TlsOptions;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dials, wraps and authenticates new connections for every node of a cluster
pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    credentials: RwLock<Option<Credentials>>,
    tls: Option<TlsOptions>,
    timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(
        connector: Arc<dyn Connector>,
        authenticator: Option<Arc<dyn Authenticator>>,
        credentials: Option<Credentials>,
        tls: Option<TlsOptions>,
        timeout: Duration,
    ) -> Result<Self> {
        if credentials.is_some() && authenticator.is_none() {
            return Err(ClusterError::configuration(
                "Credentials are configured but no authenticator was provided",
                Some("user"),
            ));
        }

        Ok(Self {
            connector,
            authenticator,
            credentials: RwLock::new(credentials),
            tls: tls.filter(|t| t.enable),
            timeout,
        })
    }

    /// Open a new connection to `host`
    ///
    /// A connection that fails authentication is closed before the error is
    /// returned.
    pub async fn create(&self, host: &Host, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        let timeout = timeout.unwrap_or(self.timeout);
        let mut conn = self.connector.connect(host, timeout, self.tls.as_ref()).await?;

        let credentials = self.credentials.read().clone();
        if let (Some(creds), Some(auth)) = (credentials, &self.authenticator) {
            if let Err(e) = auth
                .authenticate(conn.as_mut(), &creds.user, &creds.hashed_password)
                .await
            {
                conn.close().await;
                return Err(e);
            }
        }

        Ok(conn)
    }

    /// Default dial and I/O timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tls(&self) -> Option<&TlsOptions> {
        self.tls.as_ref()
    }

    pub fn user(&self) -> Option<String> {
        self.credentials.read().as_ref().map(|c| c.user.clone())
    }

    /// Replace the password used for future connections
    ///
    /// Ignored unless `user` is the configured user.
    pub fn change_password(&self, user: &str, password: &str) -> bool {
        let Some(auth) = &self.authenticator else {
            return false;
        };

        let mut credentials = self.credentials.write();
        match credentials.as_mut() {
            Some(creds) if creds.user == user => {
                creds.hashed_password = auth.hash_password(password);
                true
            }
            _ => false,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub capacity: usize,
    pub connections_created: u64,
    pub connections_closed: u64,
}

/// Idle connections to one node
pub struct ConnectionPool {
    host: Host,
    factory: Arc<ConnectionFactory>,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    capacity: usize,
    created: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionPool {
    pub fn new(host: Host, factory: Arc<ConnectionFactory>, capacity: usize) -> Self {
        Self {
            host,
            factory,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Take an idle connection that is still connected, or dial a new one
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        loop {
            let next = self.idle.lock().pop_front();
            match next {
                Some(mut conn) if conn.is_connected() => {
                    conn.set_timeout(timeout.unwrap_or(self.factory.timeout()));
                    return Ok(conn);
                }
                Some(mut conn) => {
                    debug!(host = %self.host, "Discarding dead idle connection");
                    self.close_connection(conn.as_mut()).await;
                }
                None => break,
            }
        }

        let conn = self.factory.create(&self.host, timeout).await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return a connection; closes it if broken or if the pool is full
    pub async fn release(&self, conn: Box<dyn Connection>) {
        let rejected = if conn.is_connected() {
            let mut idle = self.idle.lock();
            if idle.len() < self.capacity {
                idle.push_back(conn);
                None
            } else {
                Some(conn)
            }
        } else {
            Some(conn)
        };

        if let Some(mut conn) = rejected {
            self.close_connection(conn.as_mut()).await;
        }
    }

    /// Close a connection that will not come back to the pool
    pub async fn close_connection(&self, conn: &mut dyn Connection) {
        conn.close().await;
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Close every idle connection without dialing
    pub async fn drain(&self) {
        let drained = std::mem::take(&mut *self.idle.lock());
        for mut conn in drained {
            self.close_connection(conn.as_mut()).await;
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_connections: self.idle_count(),
            capacity: self.capacity,
            connections_created: self.created.load(Ordering::Relaxed),
            connections_closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct MockConnection {
        host: Host,
        open: bool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn write(&mut self, _buf: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn read(&mut self, len: usize) -> Result<Bytes> {
            Ok(Bytes::from(vec![0u8; len]))
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
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Default)]
    struct MockConnector {
        dials: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            host: &Host,
            _timeout: Duration,
            _tls: Option<&TlsOptions>,
        ) -> Result<Box<dyn Connection>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                host: host.clone(),
                open: true,
                closes: self.closes.clone(),
            }))
        }
    }

    struct MockAuth {
        accept: AtomicBool,
    }

    #[async_trait]
    impl Authenticator for MockAuth {
        async fn authenticate(
            &self,
            _conn: &mut dyn Connection,
            _user: &str,
            hashed_password: &str,
        ) -> Result<()> {
            if self.accept.load(Ordering::SeqCst) && hashed_password == "hashed:secret" {
                Ok(())
            } else {
                Err(ClusterError::invalid_credentials("rejected"))
            }
        }

        fn hash_password(&self, password: &str) -> String {
            format!("hashed:{}", password)
        }
    }

    fn pool_with(connector: Arc<MockConnector>, capacity: usize) -> ConnectionPool {
        let factory =
            ConnectionFactory::new(connector, None, None, None, Duration::from_secs(1)).unwrap();
        ConnectionPool::new(Host::new("10.0.0.1", 3000), Arc::new(factory), capacity)
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_connection() {
        let connector = Arc::new(MockConnector::default());
        let pool = pool_with(connector.clone(), 2);

        let conn = pool.acquire(None).await.unwrap();
        pool.release(conn).await;
        assert_eq!(pool.idle_count(), 1);

        let _conn = pool.acquire(None).await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_release_closes_when_full() {
        let connector = Arc::new(MockConnector::default());
        let pool = pool_with(connector.clone(), 1);

        let a = pool.acquire(None).await.unwrap();
        let b = pool.acquire(None).await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_dead_idle_connection_is_discarded() {
        let connector = Arc::new(MockConnector::default());
        let pool = pool_with(connector.clone(), 4);

        let mut conn = pool.acquire(None).await.unwrap();
        conn.close().await;
        // A closed connection never re-enters the queue
        pool.release(conn).await;
        assert_eq!(pool.idle_count(), 0);

        let _fresh = pool.acquire(None).await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drain_closes_idle_without_dialing() {
        let connector = Arc::new(MockConnector::default());
        let pool = pool_with(connector.clone(), 4);

        let a = pool.acquire(None).await.unwrap();
        let b = pool.acquire(None).await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        pool.drain().await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 2);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_authentication_closes_connection() {
        let connector = Arc::new(MockConnector::default());
        let auth = Arc::new(MockAuth {
            accept: AtomicBool::new(false),
        });
        let factory = ConnectionFactory::new(
            connector.clone(),
            Some(auth.clone()),
            Some(Credentials::new("admin", "hashed:secret")),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let pool = ConnectionPool::new(Host::new("10.0.0.1", 3000), Arc::new(factory), 4);

        let err = pool.acquire(None).await.err().unwrap();
        assert_eq!(err.category(), "invalid_credentials");
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().connections_created, 0);

        auth.accept.store(true, Ordering::SeqCst);
        assert!(pool.acquire(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_password_only_for_configured_user() {
        let connector = Arc::new(MockConnector::default());
        let auth = Arc::new(MockAuth {
            accept: AtomicBool::new(true),
        });
        let factory = ConnectionFactory::new(
            connector,
            Some(auth),
            Some(Credentials::new("admin", "hashed:old")),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let host = Host::new("10.0.0.1", 3000);

        assert!(factory.create(&host, None).await.is_err());
        assert!(!factory.change_password("someone-else", "secret"));
        assert!(factory.change_password("admin", "secret"));
        assert!(factory.create(&host, None).await.is_ok());
    }

    #[test]
    fn test_credentials_require_authenticator() {
        let connector = Arc::new(MockConnector::default());
        let result = ConnectionFactory::new(
            connector,
            None,
            Some(Credentials::new("admin", "x")),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ClusterError::Configuration { .. })));
    }
}
