//! Replication of data-plane requests.
//!
//! The node a client talks to coordinates: it routes the request on the hash ring, applies it
//! locally if it is one of the replicas, sends it to the other replicas, and waits until enough of
//! them acknowledge or the quorum timeout passes. Gateway nodes hold no data and hand every request
//! to a data node instead.

use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use tokio::time::Instant;

use self::session::SessionTable;
use crate::{
    cluster::Cluster,
    node::Node,
    storage::Storage,
    transport::{Acknowledgement, Envelope, Forward, Message, MessageType, Request, SessionId, Transport},
    Error, Result,
};

pub mod quorum;
mod replica;
mod session;

pub use quorum::{QuorumOutcome, SessionState};

pub struct Coordinator {
    cluster: Arc<Cluster>,
    transport: Transport,
    storage: Arc<dyn Storage>,
    quorum: Option<usize>,
    quorum_timeout: Duration,
    sessions: SessionTable,
}

impl Coordinator {
    pub fn new(
        cluster: Arc<Cluster>,
        transport: Transport,
        storage: Arc<dyn Storage>,
        quorum: Option<usize>,
        quorum_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            transport,
            storage,
            quorum,
            quorum_timeout,
            sessions: SessionTable::new(),
        }
    }

    /// Runs a client request from this node. Gateways forward it, data nodes coordinate it.
    pub async fn execute(&self, request: Request) -> Result<QuorumOutcome> {
        if self.cluster.this_node().await.gateway {
            self.forward(request).await
        } else {
            self.coordinate(request).await
        }
    }

    /// Replicates `request` to the nodes the ring assigns its routing key to.
    ///
    /// Returns `Err` only when no replica is known, before anything is applied. A quorum that is
    /// not reached in time is an `Ok` outcome in the [SessionState::TimedOut] state.
    pub async fn coordinate(&self, request: Request) -> Result<QuorumOutcome> {
        let this_node = self.cluster.this_node().await;
        let mut replicas = self.cluster.route(request.routing_key()).await;
        if replicas.is_empty() {
            return Err(Error::NoReplicas(request.routing_key().to_string()));
        }
        let required = self
            .quorum
            .map_or(replicas.len(), |quorum| quorum.clamp(1, replicas.len()));
        let key = request.routing_key().to_string();
        let request_type = request.request_type();

        let listening = self.sessions.open(
            request_type,
            required,
            Instant::now() + self.quorum_timeout,
            MessageType::Acknowledgement,
        );
        let session_id = listening.id();
        if let Some(index) = replicas.iter().position(|n| n.id == this_node.id) {
            replicas.remove(index);
            let ack = replica::apply(Arc::clone(&self.storage), session_id, request.clone()).await;
            listening.record(&this_node.id, &ack);
        }
        // the other replicas get the request even when the local ack settled the session
        self.fan_out(&this_node, replicas, request.into_message(session_id));

        let outcome = listening.wait().await;
        if outcome.is_timed_out() {
            log::warn!(
                "[{}] {:?} {}: sloppy quorum, {} of {} replicas acknowledged",
                this_node.id,
                request_type,
                key,
                outcome.received,
                outcome.required
            );
        }
        Ok(outcome)
    }

    /// Hands `request` to a random active data node, and waits for the outcome of the session it
    /// coordinates.
    pub async fn forward(&self, request: Request) -> Result<QuorumOutcome> {
        let this_node = self.cluster.this_node().await;
        let candidates: Vec<Node> = self
            .cluster
            .active_nodes()
            .await
            .into_iter()
            .filter(|n| !n.gateway)
            .collect();
        let target = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(Error::NoForwardTarget)?;

        let listening = self.sessions.open(
            request.request_type(),
            1,
            Instant::now() + self.quorum_timeout,
            MessageType::ForwardAck,
        );
        log::debug!(
            "[{}] Forwarding {:?} {} to {}",
            this_node.id,
            request.request_type(),
            request.routing_key(),
            target.id
        );
        let envelope = Envelope::new(
            this_node.clone(),
            Message::Forward(Forward {
                session: listening.id(),
                request,
            }),
        );
        self.transport.send(&target, &envelope).await?;

        let outcome = listening.wait().await;
        if outcome.is_timed_out() {
            log::warn!(
                "[{}] No answer from {} to a forwarded request",
                this_node.id,
                target.id
            );
        }
        Ok(outcome)
    }

    /// Hands an envelope of the ack channel to the session waiting for it
    pub fn acknowledge(&self, envelope: Envelope) {
        self.sessions.dispatch(envelope);
    }

    /// Handles a message received on the request channel.
    ///
    /// Replica requests are applied and acknowledged inline. Forwarded requests are coordinated
    /// in their own task.
    pub async fn handle(self: Arc<Self>, envelope: Envelope) {
        let Envelope { sender, message } = envelope;
        match message {
            Message::Forward(Forward { session, request }) => {
                tokio::spawn(async move { self.serve_forward(sender, session, request).await });
            }
            message @ (Message::BucketCreate(_)
            | Message::BucketDelete(_)
            | Message::ObjectCreate(_)
            | Message::ObjectRead(_)
            | Message::ObjectUpdate(_)
            | Message::ObjectDelete(_)) => {
                let Some((session, request)) = message.into_request() else {
                    return;
                };
                log::debug!(
                    "{:?} {} from {}",
                    request.request_type(),
                    request.routing_key(),
                    sender.id
                );
                let ack = replica::apply(Arc::clone(&self.storage), session, request).await;
                self.reply(&sender, Message::Acknowledgement(ack)).await;
            }
            other @ (Message::Ping
            | Message::NodeList(_)
            | Message::Acknowledgement(_)
            | Message::ForwardAck(_)) => {
                log::warn!(
                    "Unexpected {:?} from {} on the request channel",
                    other.message_type(),
                    sender.id
                );
            }
        }
    }

    async fn serve_forward(&self, sender: Node, session: SessionId, request: Request) {
        let request_type = request.request_type();
        let key = request.routing_key().to_string();
        let (replicas, success, value) = match self.coordinate(request).await {
            Ok(outcome) => (outcome.received, outcome.is_success(), outcome.value),
            Err(e) => {
                log::warn!("Forwarded {:?} {} failed: {}", request_type, key, e);
                (0, false, None)
            }
        };
        let ack = Acknowledgement {
            session,
            request_type,
            key,
            replicas,
            success,
            value,
        };
        self.reply(&sender, Message::ForwardAck(ack)).await;
    }

    async fn reply(&self, to: &Node, message: Message) {
        let envelope = Envelope::new(self.cluster.this_node().await, message);
        if let Err(e) = self.transport.send(to, &envelope).await {
            log::warn!(
                "Could not acknowledge {:?} to {}: {}",
                envelope.message.message_type(),
                to.id,
                e
            );
        }
    }

    /// Sends `message` to every replica, one task per send
    fn fan_out(&self, this_node: &Node, replicas: Vec<Node>, message: Message) {
        let envelope = Arc::new(Envelope::new(this_node.clone(), message));
        for replica in replicas {
            let transport = self.transport.clone();
            let envelope = Arc::clone(&envelope);
            tokio::spawn(async move {
                if let Err(e) = transport.send(&replica, &envelope).await {
                    log::warn!(
                        "Could not send {:?} to {}: {}",
                        envelope.message.message_type(),
                        replica.id,
                        e
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::net::UdpSocket;

    use super::{Coordinator, SessionState};
    use crate::{
        cluster::Cluster,
        node::{test_node, Node},
        storage::{MemoryStorage, Storage},
        transport::{codec, Envelope, Message, ObjectRequest, Request, Transport},
        Error,
    };

    fn coordinator(this_node: Node, replicas: usize, timeout: Duration) -> (Arc<Coordinator>, Arc<MemoryStorage>) {
        let (cluster, _expiries) = Cluster::new(
            this_node,
            vec![],
            3,
            replicas,
            Duration::from_secs(3600),
            None,
        );
        let storage = Arc::new(MemoryStorage::default());
        let coordinator = Coordinator::new(
            Arc::new(cluster),
            Transport::new(1500),
            storage.clone(),
            None,
            timeout,
        );
        (Arc::new(coordinator), storage)
    }

    fn loopback_node(name: &str) -> Node {
        let mut node = test_node(name, 0);
        node.io_port = 0;
        node.ack_port = 0;
        node
    }

    #[tokio::test]
    async fn a_lone_node_replicates_to_itself() {
        let (coordinator, storage) = coordinator(loopback_node("a"), 2, Duration::from_secs(20));
        let outcome = coordinator
            .execute(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::Satisfied);
        assert!(outcome.is_success());
        assert!(storage.bucket_exists("b1"));

        let outcome = coordinator
            .execute(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn reads_return_the_replicated_value() {
        let (coordinator, _storage) = coordinator(loopback_node("a"), 1, Duration::from_secs(20));
        coordinator
            .coordinate(Request::ObjectCreate {
                bucket: "b1".into(),
                key: "k1".into(),
                value: "v1".into(),
            })
            .await
            .unwrap();
        let outcome = coordinator
            .coordinate(Request::ObjectRead {
                bucket: "b1".into(),
                key: "k1".into(),
            })
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.value.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn silent_replicas_end_in_a_sloppy_quorum() {
        let (coordinator, storage) =
            coordinator(loopback_node("a"), 2, Duration::from_millis(300));
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut b = test_node("b", 0);
        b.io_port = silent.local_addr().unwrap().port();
        coordinator.cluster.merge_node_list(b, vec![]).await;

        let outcome = coordinator
            .coordinate(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::TimedOut);
        assert_eq!((outcome.received, outcome.required), (1, 2));
        assert!(!outcome.is_success());
        // the local replica was still applied
        assert!(storage.bucket_exists("b1"));
    }

    #[tokio::test]
    async fn an_occupied_ack_port_does_not_stop_the_fan_out() {
        // another socket holds the advertised ack port for the whole session
        let occupied = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut a = loopback_node("a");
        a.ack_port = occupied.local_addr().unwrap().port();
        let (coordinator, storage) = coordinator(a, 2, Duration::from_millis(300));
        let replica = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut b = test_node("b", 0);
        b.io_port = replica.local_addr().unwrap().port();
        coordinator.cluster.merge_node_list(b, vec![]).await;

        let outcome = coordinator
            .coordinate(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::TimedOut);
        assert_eq!(outcome.received, 1);
        assert!(storage.bucket_exists("b1"));

        // the local apply was followed by the send to the other replica
        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), replica.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let message = codec::decode(&buf[..len]).unwrap().message;
        assert!(matches!(message, Message::BucketCreate(_)), "{:?}", message);
        drop(occupied);
    }

    #[tokio::test]
    async fn a_local_quorum_of_one_sends_nothing() {
        let (coordinator, storage) = coordinator(loopback_node("a"), 1, Duration::from_secs(20));
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut b = test_node("b", 0);
        b.io_port = peer.local_addr().unwrap().port();
        coordinator.cluster.merge_node_list(b, vec![]).await;

        let mut bucket = None;
        for i in 0..100 {
            let candidate = format!("bucket-{}", i);
            let replicas = coordinator.cluster.route(&candidate).await;
            if replicas.len() == 1 && replicas[0].id.as_str() == "a" {
                bucket = Some(candidate);
                break;
            }
        }
        let bucket = bucket.expect("no bucket routed to the local node");

        let outcome = coordinator
            .coordinate(Request::BucketCreate {
                bucket: bucket.clone(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::Satisfied);
        assert_eq!((outcome.received, outcome.required), (1, 1));
        assert!(outcome.is_success());
        assert!(storage.bucket_exists(&bucket));

        let mut buf = vec![0u8; 1500];
        let received =
            tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await;
        assert!(received.is_err(), "the peer received a datagram");
    }

    #[tokio::test]
    async fn gateways_without_data_nodes_cannot_forward() {
        let mut gateway = loopback_node("g");
        gateway.gateway = true;
        let (coordinator, _storage) = coordinator(gateway, 2, Duration::from_secs(20));
        let result = coordinator
            .execute(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await;
        assert!(matches!(result, Err(Error::NoForwardTarget)));
        let result = coordinator
            .coordinate(Request::BucketCreate {
                bucket: "b1".into(),
            })
            .await;
        assert!(matches!(result, Err(Error::NoReplicas(_))));
    }

    #[tokio::test]
    async fn replica_requests_are_applied_and_acknowledged() {
        let (coordinator, storage) = coordinator(loopback_node("a"), 1, Duration::from_secs(20));
        let ack_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut requester = test_node("b", 7002);
        requester.ack_port = ack_socket.local_addr().unwrap().port();

        let envelope = Envelope::new(
            requester,
            Message::ObjectCreate(ObjectRequest {
                session: 31,
                bucket: "b1".into(),
                key: "k1".into(),
                value: Some("v1".into()),
            }),
        );
        coordinator.clone().handle(envelope).await;
        assert_eq!(storage.read_object("b1", "k1").unwrap().as_deref(), Some("v1"));

        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), ack_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let ack = match codec::decode(&buf[..len]).unwrap().message {
            Message::Acknowledgement(ack) => ack,
            other => panic!("expected an acknowledgement, got {:?}", other),
        };
        assert_eq!(ack.session, 31);
        assert_eq!(ack.key, "k1");
        assert!(ack.success);
    }
}
