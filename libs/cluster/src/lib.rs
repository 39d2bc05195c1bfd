//! # Cluster Tending
//!
//! Client-side membership and topology tracking for a partitioned key-value
//! store. A [`Cluster`] discovers server nodes from a list of seeds, keeps
//! verifying their identity and health on a background task, learns which
//! node owns each partition, and answers "which node handles partition P"
//! for request code without ever blocking it.
//!
//! ## Layers
//!
//! ```text
//! Cluster (tend cycle, routing, listeners)
//!    |-- Node (identity, health, per-cycle state) -- ConnectionPool
//!    |-- NodeValidator (resolve + probe)
//!    |-- peers (peer list parsing, per-cycle working set)
//!    `-- PartitionMap (namespace -> owner per partition)
//!
//! collaborators: Connector/Connection, InfoClient, Authenticator, PartitionTokenizer
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use client_config::{defaults, ClientPolicy};
//! use cluster::{Cluster, ClusterServices, Host, Partition};
//!
//! # async fn run() -> cluster::Result<()> {
//! let seeds = Host::parse("10.0.0.1:3000,10.0.0.2:3000", defaults::DEFAULT_PORT)?;
//! let cluster = Cluster::new(ClientPolicy::default(), seeds, ClusterServices::new())?;
//! cluster.connect().await?;
//!
//! let node = cluster.get_node(&Partition::new("test", 42))?;
//! let conn = node.get_connection(None).await?;
//! node.put_connection(conn).await;
//!
//! cluster.close().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cluster;
pub mod error;
pub mod host;
pub mod info;
pub mod node;
pub mod partition;
pub mod peers;
pub mod pool;
pub mod transport;

pub use auth::{Authenticator, Credentials};
pub use cluster::{
    find_nodes_to_remove, Cluster, ClusterConfigListener, ClusterServices, RefreshFailure, RefreshStep,
    TendReport,
};
pub use error::{ClusterError, Result};
pub use host::Host;
pub use info::{InfoClient, TextInfoClient};
pub use node::{Generation, Node, NodeIdentity, NodeValidator, FULL_HEALTH};
pub use partition::{InfoProtocol, Partition, PartitionMap, PartitionTokenizer, DIGEST_SIZE, PARTITIONS};
pub use peers::{parse_peers, Peer, PeerList, Peers};
pub use pool::{ConnectionFactory, ConnectionPool, PoolStats};
pub use transport::{Connection, Connector, TcpConnection, TcpConnector};
