use std::sync::Arc;

use cluster::{failure_detector::Expiry, Cluster};
use coordinator::Coordinator;
use tokio::{
    select,
    sync::mpsc,
    task::JoinHandle,
    time::Interval,
};
use transport::{Envelope, Message, Transport};

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod builder;
mod error;
mod hasher;

pub mod cluster;
pub mod coordinator;
pub mod heartbeat;
pub mod node;
pub mod ring;
pub mod storage;
pub mod transport;

pub use self::builder::*;
pub use self::coordinator::{QuorumOutcome, SessionState};
pub use self::error::{Error, Result};
pub use self::node::{Node, NodeId};
pub use self::transport::Request;

/// A running store node.
///
/// The node gossips its membership, detects failed peers, serves the requests other nodes send
/// it as a replica, and coordinates the client operations called on it. Everything runs in tasks
/// spawned by [DynamoBuilder::start], on the current tokio runtime.
pub struct Dynamo {
    cluster: Arc<Cluster>,
    coordinator: Arc<Coordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dynamo {
    pub fn builder(name: impl Into<NodeId>, addr: std::net::SocketAddr) -> DynamoBuilder {
        DynamoBuilder::new(name, addr)
    }

    /// This node, with its current heartbeat
    pub async fn this_node(&self) -> Node {
        self.cluster.this_node().await
    }

    pub async fn active_nodes(&self) -> Vec<Node> {
        self.cluster.active_nodes().await
    }

    pub async fn dead_nodes(&self) -> Vec<Node> {
        self.cluster.dead_nodes().await
    }

    /// The replicas currently responsible for `key`
    pub async fn route(&self, key: &str) -> Vec<Node> {
        self.cluster.route(key).await
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<QuorumOutcome> {
        self.execute(Request::BucketCreate {
            bucket: bucket.to_string(),
        })
        .await
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<QuorumOutcome> {
        self.execute(Request::BucketDelete {
            bucket: bucket.to_string(),
        })
        .await
    }

    pub async fn create_object(&self, bucket: &str, key: &str, value: &str) -> Result<QuorumOutcome> {
        self.execute(Request::ObjectCreate {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// The value read is in [QuorumOutcome::value]
    pub async fn read_object(&self, bucket: &str, key: &str) -> Result<QuorumOutcome> {
        self.execute(Request::ObjectRead {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
        .await
    }

    pub async fn update_object(&self, bucket: &str, key: &str, value: &str) -> Result<QuorumOutcome> {
        self.execute(Request::ObjectUpdate {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<QuorumOutcome> {
        self.execute(Request::ObjectDelete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
        .await
    }

    /// Coordinates `request` from this node, or forwards it if this node is a gateway
    pub async fn execute(&self, request: Request) -> Result<QuorumOutcome> {
        self.coordinator.execute(request).await
    }

    /// Has a random data node coordinate `request`
    pub async fn forward(&self, request: Request) -> Result<QuorumOutcome> {
        self.coordinator.forward(request).await
    }

    /// Stops the node. Its sockets close and peers will eventually declare it dead.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Merges incoming node lists and applies fired failure timers
    pub(crate) async fn membership_loop(
        cluster: Arc<Cluster>,
        mut gossip: mpsc::Receiver<Envelope>,
        mut expiries: mpsc::UnboundedReceiver<Expiry>,
    ) {
        loop {
            select! {
                Some(envelope) = gossip.recv() => {
                    let Envelope { sender, message } = envelope;
                    match message {
                        Message::NodeList(nodes) => {
                            cluster.merge_node_list(sender, nodes).await;
                        }
                        Message::Ping => log::debug!("Ping from {}", sender.id),
                        other => log::warn!(
                            "Unexpected {:?} from {} on the gossip channel",
                            other.message_type(),
                            sender.id
                        ),
                    }
                },
                Some(expiry) = expiries.recv() => {
                    cluster.expire(expiry).await;
                },
                else => break,
            }
        }
    }

    pub(crate) async fn gossip_loop(cluster: Arc<Cluster>, transport: Transport, mut interval: Interval) {
        loop {
            interval.tick().await;
            if let Err(e) = cluster.gossip_round(&transport).await {
                log::warn!("Gossip round failed: {}", e);
            }
        }
    }

    pub(crate) async fn request_loop(
        coordinator: Arc<Coordinator>,
        mut requests: mpsc::Receiver<Envelope>,
    ) {
        while let Some(envelope) = requests.recv().await {
            Arc::clone(&coordinator).handle(envelope).await;
        }
    }

    /// Feeds the acknowledgements received on the ack port to the sessions waiting for them
    pub(crate) async fn ack_loop(coordinator: Arc<Coordinator>, mut acks: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = acks.recv().await {
            coordinator.acknowledge(envelope);
        }
    }
}

impl Drop for Dynamo {
    fn drop(&mut self) {
        self.shutdown();
    }
}
