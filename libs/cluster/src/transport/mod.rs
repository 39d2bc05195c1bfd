//! Transport Layer
//!
//! Capability contract for raw connections to server nodes. The tend loop and
//! the connection pool only talk to [`Connector`] and [`Connection`]; the
//! default [`TcpConnector`] dials plain TCP or TLS over `tokio`.

use crate::host::Host;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use client_config::TlsOptions;
use std::time::Duration;

pub mod tcp;

pub use tcp::{TcpConnection, TcpConnector};

/// One established, blocking-style stream to a node
#[async_trait]
pub trait Connection: Send {
    /// Write the whole buffer
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes
    async fn read(&mut self, len: usize) -> Result<Bytes>;

    /// Deadline applied to every subsequent read and write
    fn set_timeout(&mut self, timeout: Duration);

    /// False once closed or known to be broken
    fn is_connected(&self) -> bool;

    /// Address this connection was dialed to
    fn host(&self) -> &Host;

    /// Shut the stream down. Idempotent.
    async fn close(&mut self);
}

/// Dials new connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection; `tls` is `Some` only when TLS is enabled
    async fn connect(
        &self,
        host: &Host,
        timeout: Duration,
        tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Connection>>;
}
