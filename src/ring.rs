use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    hasher,
    node::{Node, NodeId},
};

/// A ring position: the digest of `"{node_id}#{vnode_index}"`.
///
/// Positions are ordered by digest first. Two virtual nodes whose digests collide
/// are ordered by physical node id, then by virtual node index, so every node
/// of the cluster walks the ring in the same order.
type Position = (u64, NodeId, u32);

/// A consistent hash ring where each physical node owns `vnode_count` virtual positions.
#[derive(Clone, Debug)]
pub struct HashRing {
    vnode_count: u32,
    positions: BTreeMap<Position, NodeId>,
    nodes: HashMap<NodeId, Node>,
}

impl HashRing {
    pub fn new(vnode_count: u32) -> Self {
        Self {
            vnode_count: vnode_count.max(1),
            positions: BTreeMap::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn vnode_count(&self) -> u32 {
        self.vnode_count
    }

    /// Number of physical nodes on the ring
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Inserts the virtual positions of `node`. Adding a node that is already on the ring
    /// only refreshes its advertised attributes.
    pub fn add_node(&mut self, node: Node) {
        if self.nodes.contains_key(&node.id) {
            self.nodes.insert(node.id.clone(), node);
            return;
        }
        for index in 0..self.vnode_count {
            let digest = hasher::digest(&format!("{}#{}", node.id, index));
            self.positions
                .insert((digest, node.id.clone(), index), node.id.clone());
        }
        log::debug!(
            "Added {} to the hash ring ({} virtual nodes)",
            node.id,
            self.vnode_count
        );
        self.nodes.insert(node.id.clone(), node);
    }

    /// Removes every virtual position of the node, returning whether it was on the ring
    pub fn remove_node(&mut self, node_id: &NodeId) -> bool {
        if self.nodes.remove(node_id).is_none() {
            return false;
        }
        self.positions.retain(|_, owner| owner != node_id);
        log::debug!("Removed {} from the hash ring", node_id);
        true
    }

    /// Returns the replicas responsible for `key`: the first `backups` distinct physical nodes
    /// met walking clockwise from the key's digest, wrapping around the ring.
    ///
    /// Exactly `min(backups, self.len())` nodes are returned, in walk order.
    pub fn route_nodes(&self, key: &str, backups: usize) -> Vec<Node> {
        let wanted = backups.min(self.nodes.len());
        let mut replicas = Vec::with_capacity(wanted);
        if wanted == 0 {
            return replicas;
        }

        let start: Position = (hasher::digest(key), NodeId::default(), 0);
        let mut seen = HashSet::with_capacity(wanted);
        let walk = self
            .positions
            .range(start.clone()..)
            .chain(self.positions.range(..start));

        for (_, owner) in walk {
            if seen.insert(owner) {
                if let Some(node) = self.nodes.get(owner) {
                    replicas.push(node.clone());
                }
                if replicas.len() == wanted {
                    break;
                }
            }
        }
        replicas
    }
}
