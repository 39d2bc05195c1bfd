//! Cluster Error Types
//!
//! Error handling for node discovery, tending and request routing.
//! Variants follow the failure classes the tend loop reacts to: connectivity
//! problems degrade a node and are retried, identity mismatches retire a node,
//! parse failures fail one refresh step.

use thiserror::Error;

/// Main cluster error type
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Dial, read or write failures
    #[error("Connection error: {message} (host: {host:?})")]
    Connection {
        message: String,
        host: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation exceeded its deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// TLS setup or handshake errors
    #[error("TLS error: {message}")]
    Tls {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Node name or cluster name disagreement
    #[error("Invalid node: {message}")]
    InvalidNode { message: String },

    /// Malformed info response, peer list or build version
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Authentication rejected by the server
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// No active node can serve the request
    #[error("No available node")]
    NoAvailableNode,

    /// Initial connect reached no node
    #[error("Server not available: {message}")]
    ServerNotAvailable { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// The cluster has been closed
    #[error("Cluster is closed")]
    Closed,
}

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, host: Option<String>) -> Self {
        Self::Connection {
            message: message.into(),
            host,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        host: Option<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            host,
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
            source: None,
        }
    }

    pub fn tls_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tls {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid node error
    pub fn invalid_node(message: impl Into<String>) -> Self {
        Self::InvalidNode {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    pub fn server_not_available(message: impl Into<String>) -> Self {
        Self::ServerNotAvailable {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::Connection { .. } => true,
            ClusterError::Timeout { .. } => true,
            ClusterError::Tls { .. } => true,
            ClusterError::Io { .. } => true,
            ClusterError::InvalidNode { .. } => false,
            ClusterError::Parse { .. } => false,
            ClusterError::InvalidCredentials { .. } => false,
            ClusterError::NoAvailableNode => true,
            ClusterError::ServerNotAvailable { .. } => true,
            ClusterError::Configuration { .. } => false,
            ClusterError::Closed => false,
        }
    }

    /// Whether the failure came from the transport rather than the server's answer
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ClusterError::Connection { .. }
                | ClusterError::Timeout { .. }
                | ClusterError::Tls { .. }
                | ClusterError::Io { .. }
        )
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            ClusterError::Connection { .. } => "connection",
            ClusterError::Timeout { .. } => "timeout",
            ClusterError::Tls { .. } => "tls",
            ClusterError::Io { .. } => "io",
            ClusterError::InvalidNode { .. } => "invalid_node",
            ClusterError::Parse { .. } => "parse",
            ClusterError::InvalidCredentials { .. } => "invalid_credentials",
            ClusterError::NoAvailableNode => "no_available_node",
            ClusterError::ServerNotAvailable { .. } => "server_not_available",
            ClusterError::Configuration { .. } => "configuration",
            ClusterError::Closed => "closed",
        }
    }
}

/// Convert standard I/O errors to cluster errors
impl From<std::io::Error> for ClusterError {
    fn from(error: std::io::Error) -> Self {
        ClusterError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let err = ClusterError::connection("Connection refused", Some("10.0.0.1:3000".into()));
        assert_eq!(err.category(), "connection");
        assert!(err.is_retryable());
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_identity_errors_are_final() {
        let err = ClusterError::invalid_node("Node name has changed");
        assert!(!err.is_retryable());
        assert!(!err.is_connectivity());
        assert!(!ClusterError::invalid_credentials("rejected").is_retryable());
    }

    #[test]
    fn test_error_categorization() {
        assert_eq!(ClusterError::parse("bad").category(), "parse");
        assert_eq!(ClusterError::timeout("connect", 1000).category(), "timeout");
        assert_eq!(ClusterError::NoAvailableNode.category(), "no_available_node");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let err = ClusterError::from(io_err);

        match err {
            ClusterError::Io { message, .. } => {
                assert!(message.contains("test"));
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_display_includes_context() {
        let err = ClusterError::timeout("info request", 1000);
        assert_eq!(err.to_string(), "Timeout error: info request exceeded 1000ms");
    }
}
