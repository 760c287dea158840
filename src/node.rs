use std::{
    hash::{Hash, Hasher},
    net::SocketAddr,
};

#[cfg(test)]
use quickcheck::Arbitrary;
use serde::{Deserialize, Serialize};

pub use self::id::NodeId;

pub mod id {
    use std::fmt::Display;

    #[cfg(test)]
    use quickcheck::Arbitrary;
    use serde::{Deserialize, Serialize};

    /// A [NodeId] is the stable name a node was started with.
    /// It survives restarts, unlike the node's heartbeat or address.
    #[repr(transparent)]
    #[derive(Clone, PartialEq, PartialOrd, Eq, Ord, Debug, Hash, Default, Serialize, Deserialize)]
    pub struct NodeId(String);

    impl NodeId {
        pub fn new(name: impl ToString) -> Self {
            Self(name.to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Display for NodeId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl From<&str> for NodeId {
        fn from(value: &str) -> Self {
            Self::new(value)
        }
    }

    #[cfg(test)]
    impl Arbitrary for NodeId {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            // A small name space so that generated node lists overlap
            NodeId(format!("node-{}", u8::arbitrary(g) % 16))
        }
    }
}

/// A member of the cluster, as advertised in gossip.
///
/// Two [Node]s are equal when their ids are equal: the heartbeat, the addresses
/// and the gateway flag are mutable attributes of one identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Membership (gossip) address
    pub addr: SocketAddr,
    /// Port of the data-plane channel, on the host of `addr`
    pub io_port: u16,
    /// Port of the acknowledgement channel, on the host of `addr`
    pub ack_port: u16,
    pub heartbeat: u64,
    /// Gateway nodes gossip but hold no data
    pub gateway: bool,
}

impl Node {
    pub fn io_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.io_port)
    }

    pub fn ack_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.ack_port)
    }

    /// Increments this node's heartbeat and returns it
    pub(crate) fn incr_heartbeat(&mut self) -> u64 {
        self.heartbeat += 1;
        self.heartbeat
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[cfg(test)]
impl Arbitrary for Node {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let id = NodeId::arbitrary(g);
        let port = 7000 + u16::arbitrary(g) % 1000;
        Self {
            id,
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            io_port: 9700,
            ack_port: 9720,
            heartbeat: u64::arbitrary(g) % 64,
            gateway: *g.choose(&[false, false, false, true]).unwrap(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_node(name: &str, port: u16) -> Node {
    Node {
        id: NodeId::new(name),
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        io_port: 9700,
        ack_port: 9720,
        heartbeat: 0,
        gateway: false,
    }
}
