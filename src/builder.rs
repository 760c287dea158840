use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use tokio::{net::UdpSocket, sync::mpsc, time::MissedTickBehavior};

use crate::{
    cluster::Cluster,
    coordinator::Coordinator,
    heartbeat::HeartbeatStore,
    node::{Node, NodeId},
    storage::{FileStorage, Storage},
    transport::{receiver::spawn_receiver, Channel, Transport, DEFAULT_MAX_FRAME_SIZE},
    Dynamo, Result,
};

/// Buffered envelopes per channel, between a receiver and its consumer
const CHANNEL_CAPACITY: usize = 256;

pub struct DynamoBuilder {
    name: NodeId,
    addr: SocketAddr,
    seed_nodes: Vec<SocketAddr>,
    gossip_interval: Duration,
    failure_timeout: Duration,
    virtual_nodes: u32,
    replicas: usize,
    quorum: Option<usize>,
    quorum_timeout: Duration,
    io_port: u16,
    ack_port: u16,
    gateway: bool,
    max_frame_size: usize,
    data_dir: PathBuf,
    storage: Option<Arc<dyn Storage>>,
}

impl DynamoBuilder {
    /// `addr` is both where the node listens for gossip and the address it advertises,
    /// so it must be reachable by the other nodes.
    pub fn new(name: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            seed_nodes: Vec::new(),
            gossip_interval: Duration::from_secs(1),
            failure_timeout: Duration::from_secs(10),
            virtual_nodes: 3,
            replicas: 1,
            quorum: None,
            quorum_timeout: Duration::from_secs(20),
            io_port: 9700,
            ack_port: 9720,
            gateway: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            data_dir: PathBuf::from("."),
            storage: None,
        }
    }
    pub fn with_seed_nodes(mut self, seed_nodes: &[SocketAddr]) -> Self {
        self.seed_nodes.extend(seed_nodes.iter().copied());
        self
    }
    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }
    /// How long a peer may stay silent before it is declared dead
    pub fn with_failure_timeout(mut self, timeout: Duration) -> Self {
        self.failure_timeout = timeout;
        self
    }
    pub fn with_virtual_nodes(mut self, virtual_nodes: u32) -> Self {
        self.virtual_nodes = virtual_nodes;
        self
    }
    /// Number of distinct nodes every key is replicated to, at least 1
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas.max(1);
        self
    }
    /// Acknowledgements a request needs to succeed. Without it, every routed replica must answer.
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }
    pub fn with_quorum_timeout(mut self, timeout: Duration) -> Self {
        self.quorum_timeout = timeout;
        self
    }
    pub fn with_io_port(mut self, port: u16) -> Self {
        self.io_port = port;
        self
    }
    pub fn with_ack_port(mut self, port: u16) -> Self {
        self.ack_port = port;
        self
    }
    /// Gateways take part in gossip and accept client requests, but hold no data
    pub fn with_gateway(mut self, gateway: bool) -> Self {
        self.gateway = gateway;
        self
    }
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Binds the gossip, request and acknowledgement sockets, resumes the persisted heartbeat and
    /// spawns the long-lived tasks of the node. The sockets stay bound until the node stops.
    pub async fn start(self) -> Result<Dynamo> {
        let gossip_socket = UdpSocket::bind(self.addr).await?;
        let addr = gossip_socket.local_addr()?;
        let io_socket = UdpSocket::bind(SocketAddr::new(addr.ip(), self.io_port)).await?;
        let io_port = io_socket.local_addr()?.port();
        let ack_socket = UdpSocket::bind(SocketAddr::new(addr.ip(), self.ack_port)).await?;
        let ack_port = ack_socket.local_addr()?.port();

        let this_node = Node {
            id: self.name.clone(),
            addr,
            io_port,
            ack_port,
            heartbeat: 0,
            gateway: self.gateway,
        };

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let heartbeat_store = HeartbeatStore::new(&self.data_dir, &self.name);
        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FileStorage::new(&self.data_dir)),
        };

        let (cluster, expiries) = Cluster::new(
            this_node,
            self.seed_nodes,
            self.virtual_nodes,
            self.replicas,
            self.failure_timeout,
            Some(heartbeat_store),
        );
        cluster.restore_heartbeat().await?;
        let cluster = Arc::new(cluster);

        let transport = Transport::new(self.max_frame_size);
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&cluster),
            transport.clone(),
            storage,
            self.quorum,
            self.quorum_timeout,
        ));

        let (gossip_sender, gossip_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (request_sender, request_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (ack_sender, ack_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let mut gossip_interval = tokio::time::interval(self.gossip_interval);
        gossip_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let tasks = vec![
            spawn_receiver(gossip_socket, Channel::Gossip, self.max_frame_size, gossip_sender),
            spawn_receiver(io_socket, Channel::Io, self.max_frame_size, request_sender),
            spawn_receiver(ack_socket, Channel::Ack, self.max_frame_size, ack_sender),
            tokio::spawn(Dynamo::membership_loop(
                Arc::clone(&cluster),
                gossip_receiver,
                expiries,
            )),
            tokio::spawn(Dynamo::gossip_loop(
                Arc::clone(&cluster),
                transport,
                gossip_interval,
            )),
            tokio::spawn(Dynamo::request_loop(
                Arc::clone(&coordinator),
                request_receiver,
            )),
            tokio::spawn(Dynamo::ack_loop(Arc::clone(&coordinator), ack_receiver)),
        ];

        log::info!(
            "[{}] Started on {} (requests on port {}, acknowledgements on port {}{})",
            self.name,
            addr,
            io_port,
            ack_port,
            if self.gateway { ", gateway" } else { "" }
        );

        Ok(Dynamo {
            cluster,
            coordinator,
            tasks,
        })
    }
}
