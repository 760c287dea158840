use std::{
    collections::{BTreeMap, HashMap},
    iter::once,
    net::SocketAddr,
};

use crate::node::{Node, NodeId};

/// How the running node sees the cluster: itself, the peers it believes alive,
/// and tombstones of the peers whose failure timer expired.
///
/// Invariants: a node is never both active and dead, and the running node is neither.
#[derive(Clone, Debug)]
pub struct Directory {
    this_node: Node,
    pub(crate) active: HashMap<NodeId, Node>,
    pub(crate) dead: HashMap<NodeId, Node>,
    seeds: Vec<SocketAddr>,
}

/// A change in the active set caused by a gossip merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    /// A node we never heard of
    Joined(Node),
    /// A tombstoned node that came back with a fresher heartbeat
    Revived(Node),
    /// An active node whose heartbeat moved forward
    Refreshed(Node),
}

impl MembershipChange {
    pub fn node(&self) -> &Node {
        match self {
            MembershipChange::Joined(node)
            | MembershipChange::Revived(node)
            | MembershipChange::Refreshed(node) => node,
        }
    }
}

impl Directory {
    pub fn new(this_node: Node, seeds: Vec<SocketAddr>) -> Self {
        let seeds = seeds.into_iter().filter(|s| *s != this_node.addr).collect();
        Self {
            this_node,
            active: HashMap::new(),
            dead: HashMap::new(),
            seeds,
        }
    }

    pub fn this_node(&self) -> &Node {
        &self.this_node
    }

    pub fn seeds(&self) -> &[SocketAddr] {
        &self.seeds
    }

    pub(crate) fn increment_heartbeat(&mut self) -> u64 {
        self.this_node.incr_heartbeat()
    }

    /// Resumes from a persisted heartbeat. The heartbeat never goes backwards.
    pub(crate) fn restore_heartbeat(&mut self, heartbeat: u64) {
        self.this_node.heartbeat = self.this_node.heartbeat.max(heartbeat);
    }

    pub fn active(&self) -> impl Iterator<Item = &Node> {
        self.active.values()
    }

    pub fn dead(&self) -> impl Iterator<Item = &Node> {
        self.dead.values()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Node> {
        self.active.get(node_id)
    }

    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.active.contains_key(node_id)
    }

    pub fn is_dead(&self, node_id: &NodeId) -> bool {
        self.dead.contains_key(node_id)
    }

    /// Merges the node list gossiped by `sender`.
    ///
    /// The sender just talked to us, so it is merged as an entry of its own list. For each entry:
    /// - an active node adopts the remote heartbeat if it is strictly greater,
    /// - a dead node is revived if the remote heartbeat is greater than its tombstone's,
    /// - an unknown node is admitted.
    ///
    /// Our own entry is ignored. Merging the same list twice changes nothing the second time.
    pub fn merge(&mut self, sender: Node, remote_nodes: Vec<Node>) -> Vec<MembershipChange> {
        let mut changes = Vec::new();

        for remote in remote_nodes.into_iter().chain(once(sender)) {
            if remote.id == self.this_node.id {
                continue;
            }

            if let Some(local) = self.active.get_mut(&remote.id) {
                if remote.heartbeat > local.heartbeat {
                    local.heartbeat = remote.heartbeat;
                    changes.push(MembershipChange::Refreshed(local.clone()));
                }
            } else if let Some(tombstone) = self.dead.get(&remote.id) {
                if remote.heartbeat > tombstone.heartbeat {
                    self.dead.remove(&remote.id);
                    self.active.insert(remote.id.clone(), remote.clone());
                    changes.push(MembershipChange::Revived(remote));
                }
            } else {
                self.active.insert(remote.id.clone(), remote.clone());
                changes.push(MembershipChange::Joined(remote));
            }
        }

        changes
    }

    /// Moves an active node to the dead set, returning its tombstone
    pub fn expire(&mut self, node_id: &NodeId) -> Option<Node> {
        let node = self.active.remove(node_id)?;
        self.dead.insert(node.id.clone(), node.clone());
        Some(node)
    }

    /// Heartbeats of the active and dead sets, ordered by id
    pub fn snapshot(&self) -> (BTreeMap<NodeId, u64>, BTreeMap<NodeId, u64>) {
        let heartbeats = |nodes: &HashMap<NodeId, Node>| {
            nodes
                .iter()
                .map(|(id, n)| (id.clone(), n.heartbeat))
                .collect()
        };
        (heartbeats(&self.active), heartbeats(&self.dead))
    }

    pub(crate) fn log_node_list(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let mut nodes: Vec<_> = self.active.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let lines: Vec<String> = nodes
            .iter()
            .map(|n| format!("| {} ip: {} heartbeat: {}", n.id, n.addr, n.heartbeat))
            .collect();
        log::debug!(
            "[{}] Active node list ({} nodes)\n{}",
            self.this_node.id,
            nodes.len(),
            lines.join("\n")
        );
    }
}
