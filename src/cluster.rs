use std::{net::SocketAddr, time::Duration};

use tokio::sync::{mpsc, Mutex};

use self::{
    directory::{Directory, MembershipChange},
    failure_detector::{Expiry, FailureDetector},
};
use crate::{
    heartbeat::HeartbeatStore,
    node::{Node, NodeId},
    ring::HashRing,
    Result,
};

pub mod directory;
pub mod failure_detector;
pub mod gossip;


/// The membership state of the running node, shared by every task of the process.
///
/// The [Directory] and the [HashRing] each sit behind their own lock. When both are needed
/// the directory is locked first. Locks are never held across a network call.
pub struct Cluster {
    directory: Mutex<Directory>,
    ring: Mutex<HashRing>,
    failure_detector: FailureDetector,
    heartbeat_store: Option<HeartbeatStore>,
    replicas: usize,
}

impl Cluster {
    /// Builds the cluster state and returns the receiving end of the failure timers,
    /// which must be fed back to [Cluster::expire].
    pub fn new(
        this_node: Node,
        seeds: Vec<SocketAddr>,
        vnode_count: u32,
        replicas: usize,
        failure_timeout: Duration,
        heartbeat_store: Option<HeartbeatStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let mut ring = HashRing::new(vnode_count);
        if !this_node.gateway {
            ring.add_node(this_node.clone());
        }
        let (failure_detector, expiries) = FailureDetector::new(failure_timeout);
        let cluster = Self {
            directory: Mutex::new(Directory::new(this_node, seeds)),
            ring: Mutex::new(ring),
            failure_detector,
            heartbeat_store,
            replicas: replicas.max(1),
        };
        (cluster, expiries)
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub async fn this_node(&self) -> Node {
        self.directory.lock().await.this_node().clone()
    }

    /// Active peers, ordered by id
    pub async fn active_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.directory.lock().await.active().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Tombstoned peers, ordered by id
    pub async fn dead_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.directory.lock().await.dead().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// The replicas of `key`, see [HashRing::route_nodes]
    pub async fn route(&self, key: &str) -> Vec<Node> {
        self.ring.lock().await.route_nodes(key, self.replicas)
    }

    pub async fn ring_contains(&self, node_id: &NodeId) -> bool {
        self.ring.lock().await.contains(node_id)
    }

    /// Resumes the heartbeat counter of a previous run of this node
    pub(crate) async fn restore_heartbeat(&self) -> Result<()> {
        let Some(store) = &self.heartbeat_store else {
            return Ok(());
        };
        if let Some(heartbeat) = store.load().await? {
            let mut directory = self.directory.lock().await;
            directory.restore_heartbeat(heartbeat);
            log::info!(
                "[{}] Resuming from heartbeat {}",
                directory.this_node().id,
                directory.this_node().heartbeat
            );
        }
        Ok(())
    }

    /// Merges a gossiped node list, then applies the resulting changes to the failure timers
    /// and the hash ring before releasing the directory.
    pub async fn merge_node_list(&self, sender: Node, nodes: Vec<Node>) -> Vec<MembershipChange> {
        let mut directory = self.directory.lock().await;
        let changes = directory.merge(sender, nodes);
        if changes.is_empty() {
            return changes;
        }

        let mut ring = self.ring.lock().await;
        let mut joined = false;
        for change in &changes {
            let node = change.node();
            self.failure_detector.arm(&node.id);
            match change {
                MembershipChange::Joined(node) | MembershipChange::Revived(node) => {
                    if !node.gateway {
                        ring.add_node(node.clone());
                    }
                    joined = true;
                    log::info!(
                        "[{}] JOIN: {} has joined the network",
                        directory.this_node().id,
                        node.id
                    );
                }
                MembershipChange::Refreshed(node) => {
                    log::trace!("{} is at heartbeat {}", node.id, node.heartbeat);
                }
            }
        }
        drop(ring);

        if joined {
            directory.log_node_list();
        }
        changes
    }

    /// Handles a fired failure timer: the node moves to the dead set and leaves the ring.
    /// Stale expiries, of timers reset since they fired, are ignored.
    pub async fn expire(&self, expiry: Expiry) -> Option<Node> {
        let mut directory = self.directory.lock().await;
        if !self.failure_detector.take_expired(&expiry) {
            return None;
        }
        let node = directory.expire(&expiry.node_id)?;
        self.ring.lock().await.remove_node(&node.id);
        log::info!(
            "[{}] LEAVE: {} has left the network",
            directory.this_node().id,
            node.id
        );
        directory.log_node_list();
        Some(node)
    }
}
