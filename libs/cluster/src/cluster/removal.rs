//! Node removal policy
//!
//! Decided once per tend cycle from that cycle's refresh results. The rules
//! get stricter as the cluster grows so that a single missed refresh never
//! evicts a node and an isolated node cannot evict the others.

use crate::node::Node;
use crate::partition::PartitionMap;
use std::sync::Arc;

/// Nodes to drop after a cycle with `refresh_count` successful refresh steps
/// (info and peers combined)
pub fn find_nodes_to_remove(
    nodes: &[Arc<Node>],
    refresh_count: usize,
    partitions: &PartitionMap,
) -> Vec<Arc<Node>> {
    nodes
        .iter()
        .filter(|node| should_remove(node, nodes.len(), refresh_count, partitions))
        .cloned()
        .collect()
}

fn should_remove(node: &Arc<Node>, cluster_size: usize, refresh_count: usize, partitions: &PartitionMap) -> bool {
    if !node.is_active() {
        return true;
    }

    match cluster_size {
        // No peers to vote; only health counts
        1 => node.is_unhealthy(),
        2 => refresh_count == 2 && node.reference_count() == 0 && !node.responded(),
        _ => {
            refresh_count >= 2
                && node.reference_count() == 0
                && (!node.responded() || !partitions.contains_node(node))
        }
    }
}
