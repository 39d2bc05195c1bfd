//! TCP Transport Implementation
//!
//! Default [`Connector`] over `tokio::net::TcpStream`, optionally wrapped in
//! TLS. The TLS handshake verifies the server certificate against the host's
//! TLS name (falling back to the host name).

use super::{Connection, Connector};
use crate::host::Host;
use crate::{ClusterError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use client_config::TlsOptions;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::native_tls;
use tokio_native_tls::TlsStream;
use tracing::{debug, warn};

/// Dials nodes over TCP
///
/// The TLS connector is built on first use and reused while the options stay
/// the same.
#[derive(Default, Clone)]
pub struct TcpConnector {
    tls: Arc<Mutex<Option<(TlsOptions, tokio_native_tls::TlsConnector)>>>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn tls_connector(&self, options: &TlsOptions) -> Result<tokio_native_tls::TlsConnector> {
        let cached = self
            .tls
            .lock()
            .as_ref()
            .filter(|(cached, _)| cached == options)
            .map(|(_, connector)| connector.clone());
        if let Some(connector) = cached {
            return Ok(connector);
        }

        let connector = Self::build_tls_connector(options).await?;
        *self.tls.lock() = Some((options.clone(), connector.clone()));
        debug!(ca_file = ?options.ca_file, "TLS connector built");
        Ok(connector)
    }

    async fn build_tls_connector(options: &TlsOptions) -> Result<tokio_native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();
        builder
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .danger_accept_invalid_hostnames(options.accept_invalid_hostnames);

        if let Some(ca_file) = &options.ca_file {
            let pem = tokio::fs::read(ca_file).await?;
            let cert = native_tls::Certificate::from_pem(&pem)
                .map_err(|e| ClusterError::tls_with_source("Invalid CA certificate", e))?;
            builder.add_root_certificate(cert);
        }

        let connector = builder
            .build()
            .map_err(|e| ClusterError::tls_with_source("Failed to build TLS connector", e))?;
        Ok(tokio_native_tls::TlsConnector::from(connector))
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector")
            .field("tls_cached", &self.tls.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &Host,
        timeout: Duration,
        tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Connection>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.name.as_str(), host.port)))
            .await
            .map_err(|_| ClusterError::timeout(format!("connect to {}", host), timeout.as_millis() as u64))?
            .map_err(|e| ClusterError::connection_with_source("Failed to connect", Some(host.to_string()), e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(host = %host, "Failed to set TCP_NODELAY: {}", e);
        }

        let stream = match tls {
            Some(options) => {
                let connector = self.tls_connector(options).await?;
                let domain = host.tls_name.as_deref().unwrap_or(&host.name);
                let tls_stream = tokio::time::timeout(timeout, connector.connect(domain, stream))
                    .await
                    .map_err(|_| ClusterError::timeout(format!("TLS handshake with {}", host), timeout.as_millis() as u64))?
                    .map_err(|e| ClusterError::tls_with_source(format!("TLS handshake with {} failed", host), e))?;
                Stream::Tls(Box::new(tls_stream))
            }
            None => Stream::Plain(stream),
        };

        debug!(host = %host, tls = tls.is_some(), "Connected");
        Ok(Box::new(TcpConnection::new(stream, host.clone(), timeout)))
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    fn io(&mut self) -> &mut (dyn AsyncReadWrite + Send + Unpin) {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.as_mut(),
        }
    }
}

trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// TCP (or TLS over TCP) connection to one node
pub struct TcpConnection {
    stream: Option<Stream>,
    host: Host,
    timeout: Duration,
    connected_at: Instant,
    /// Reusable read buffer
    read_buffer: BytesMut,
}

impl TcpConnection {
    fn new(stream: Stream, host: Host, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            host,
            timeout,
            connected_at: Instant::now(),
            read_buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Time since the connection was established
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        let host = self.host.to_string();
        self.stream
            .as_mut()
            .ok_or_else(|| ClusterError::connection("Connection is closed", Some(host)))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let host = self.host.to_string();
        let io = self.stream()?.io();

        tokio::time::timeout(timeout, async {
            io.write_all(buf).await?;
            io.flush().await
        })
        .await
        .map_err(|_| ClusterError::timeout(format!("write to {}", host), timeout.as_millis() as u64))?
        .map_err(|e| ClusterError::connection_with_source("Failed to write", Some(host), e))
    }

    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let timeout = self.timeout;
        let host = self.host.to_string();

        let mut buffer = std::mem::take(&mut self.read_buffer);
        buffer.clear();
        buffer.resize(len, 0);

        let io = self.stream()?.io();
        let outcome = tokio::time::timeout(timeout, io.read_exact(&mut buffer[..])).await;

        match outcome {
            Ok(Ok(_)) => {
                let data = buffer.split_to(len).freeze();
                self.read_buffer = buffer;
                Ok(data)
            }
            Ok(Err(e)) => Err(ClusterError::connection_with_source("Failed to read", Some(host), e)),
            Err(_) => Err(ClusterError::timeout(format!("read from {}", host), timeout.as_millis() as u64)),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn host(&self) -> &Host {
        &self.host
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.io().shutdown().await {
                debug!(host = %self.host, "Error shutting down connection: {}", e);
            }
        }
    }
}
