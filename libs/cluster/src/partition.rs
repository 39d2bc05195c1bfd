//! Partition routing
//!
//! Each namespace owns [`PARTITIONS`] partitions; the partition map stores,
//! per namespace, which node currently owns each one. The map is an immutable
//! value: updates clone it (cheaply, one `Arc` per namespace) and the cluster
//! swaps the new value in.

use crate::node::Node;
use crate::transport::Connection;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Partitions per namespace
pub const PARTITIONS: usize = 4096;

/// Length of a record key digest
pub const DIGEST_SIZE: usize = 20;

/// Info protocol generation a node speaks, fixed when the node is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoProtocol {
    /// Builds before 2.6.6
    Legacy,
    Modern,
}

impl InfoProtocol {
    pub fn from_version(major: u32, minor: u32, patch: u32) -> Self {
        if (major, minor, patch) >= (2, 6, 6) {
            InfoProtocol::Modern
        } else {
            InfoProtocol::Legacy
        }
    }
}

/// One routing target: namespace plus partition id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub namespace: String,
    pub partition_id: usize,
}

impl Partition {
    pub fn new(namespace: impl Into<String>, partition_id: usize) -> Self {
        Self {
            namespace: namespace.into(),
            partition_id,
        }
    }

    /// Partition owning the key with this digest
    pub fn from_digest(namespace: impl Into<String>, digest: &[u8; DIGEST_SIZE]) -> Self {
        let id = u16::from_le_bytes([digest[0], digest[1]]) as usize & (PARTITIONS - 1);
        Self::new(namespace, id)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.partition_id)
    }
}

/// Namespace -> owner per partition
///
/// Owners are held weakly; a removed node simply stops resolving.
#[derive(Clone, Default)]
pub struct PartitionMap {
    namespaces: HashMap<String, Arc<Vec<Weak<Node>>>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of `partition`, if it is known and still alive
    pub fn owner(&self, partition: &Partition) -> Option<Arc<Node>> {
        self.namespaces
            .get(&partition.namespace)
            .and_then(|owners| owners.get(partition.partition_id))
            .and_then(Weak::upgrade)
    }

    /// Record `node` as owner of `partition_ids` in `namespace`
    pub fn assign(&mut self, namespace: &str, partition_ids: impl IntoIterator<Item = usize>, node: &Arc<Node>) {
        let owners = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(vec![Weak::new(); PARTITIONS]));
        let owners = Arc::make_mut(owners);
        for id in partition_ids {
            if let Some(slot) = owners.get_mut(id) {
                *slot = Arc::downgrade(node);
            }
        }
    }

    /// Whether any partition in any namespace points at `node`
    pub fn contains_node(&self, node: &Arc<Node>) -> bool {
        let target = Arc::as_ptr(node);
        self.namespaces
            .values()
            .any(|owners| owners.iter().any(|owner| std::ptr::eq(owner.as_ptr(), target)))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

impl fmt::Debug for PartitionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (namespace, owners) in &self.namespaces {
            let assigned = owners.iter().filter(|o| o.strong_count() > 0).count();
            map.entry(namespace, &assigned);
        }
        map.finish()
    }
}

/// Reads a node's self-reported partition ownership
#[async_trait]
pub trait PartitionTokenizer: Send + Sync {
    /// Merge the ownership reported by `node` into a copy of `existing`;
    /// `None` when nothing changed
    async fn update(
        &self,
        conn: &mut dyn Connection,
        node: &Arc<Node>,
        existing: &PartitionMap,
    ) -> Result<Option<PartitionMap>>;
}
