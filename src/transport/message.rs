use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Correlates data-plane requests with the acknowledgements they produce.
pub type SessionId = u64;

/// What travels in one datagram: the sender's current gossip entry and a typed message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Node,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: Node, message: Message) -> Self {
        Self { sender, message }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Ping,
    /// The sender's active node list
    NodeList(Vec<Node>),
    Acknowledgement(Acknowledgement),
    /// A client request the receiver should coordinate on the sender's behalf
    Forward(Forward),
    ForwardAck(Acknowledgement),
    BucketCreate(BucketRequest),
    BucketDelete(BucketRequest),
    ObjectCreate(ObjectRequest),
    ObjectRead(ObjectRequest),
    ObjectUpdate(ObjectRequest),
    ObjectDelete(ObjectRequest),
}

/// The type tag of a [Message], written as the first byte of every frame.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
pub enum MessageType {
    Ping = 0,
    NodeList = 1,
    Acknowledgement = 2,
    Forward = 3,
    ForwardAck = 4,
    BucketCreate = 5,
    BucketDelete = 6,
    ObjectCreate = 7,
    ObjectRead = 8,
    ObjectUpdate = 9,
    ObjectDelete = 10,
}

/// The three logical channels, each bound to its own port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Membership, on each node's own address
    Gossip,
    /// Bucket and object operations plus forwarded requests
    Io,
    /// Acknowledgements, received by the ephemeral listener of a quorum session
    Ack,
}

impl MessageType {
    pub fn channel(self) -> Channel {
        match self {
            MessageType::Ping | MessageType::NodeList => Channel::Gossip,
            MessageType::Acknowledgement | MessageType::ForwardAck => Channel::Ack,
            MessageType::Forward
            | MessageType::BucketCreate
            | MessageType::BucketDelete
            | MessageType::ObjectCreate
            | MessageType::ObjectRead
            | MessageType::ObjectUpdate
            | MessageType::ObjectDelete => Channel::Io,
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping => MessageType::Ping,
            Message::NodeList(_) => MessageType::NodeList,
            Message::Acknowledgement(_) => MessageType::Acknowledgement,
            Message::Forward(_) => MessageType::Forward,
            Message::ForwardAck(_) => MessageType::ForwardAck,
            Message::BucketCreate(_) => MessageType::BucketCreate,
            Message::BucketDelete(_) => MessageType::BucketDelete,
            Message::ObjectCreate(_) => MessageType::ObjectCreate,
            Message::ObjectRead(_) => MessageType::ObjectRead,
            Message::ObjectUpdate(_) => MessageType::ObjectUpdate,
            Message::ObjectDelete(_) => MessageType::ObjectDelete,
        }
    }

    pub fn channel(&self) -> Channel {
        self.message_type().channel()
    }

    /// Splits a data-plane message into its session and the request it carries
    pub fn into_request(self) -> Option<(SessionId, Request)> {
        match self {
            Message::BucketCreate(BucketRequest { session, bucket }) => {
                Some((session, Request::BucketCreate { bucket }))
            }
            Message::BucketDelete(BucketRequest { session, bucket }) => {
                Some((session, Request::BucketDelete { bucket }))
            }
            Message::ObjectCreate(ObjectRequest {
                session,
                bucket,
                key,
                value,
            }) => Some((
                session,
                Request::ObjectCreate {
                    bucket,
                    key,
                    value: value.unwrap_or_default(),
                },
            )),
            Message::ObjectRead(ObjectRequest {
                session,
                bucket,
                key,
                ..
            }) => Some((session, Request::ObjectRead { bucket, key })),
            Message::ObjectUpdate(ObjectRequest {
                session,
                bucket,
                key,
                value,
            }) => Some((
                session,
                Request::ObjectUpdate {
                    bucket,
                    key,
                    value: value.unwrap_or_default(),
                },
            )),
            Message::ObjectDelete(ObjectRequest {
                session,
                bucket,
                key,
                ..
            }) => Some((session, Request::ObjectDelete { bucket, key })),
            Message::Ping
            | Message::NodeList(_)
            | Message::Acknowledgement(_)
            | Message::Forward(_)
            | Message::ForwardAck(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRequest {
    pub session: SessionId,
    pub bucket: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub session: SessionId,
    pub bucket: String,
    pub key: String,
    /// Present for creates and updates
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    pub session: SessionId,
    pub request: Request,
}

/// The reply of a replica (or, as a FORWARD_ACK, of a forwarding target) to one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub session: SessionId,
    pub request_type: MessageType,
    /// The bucket name for bucket operations, the object key otherwise
    pub key: String,
    /// How many replicas this acknowledgement vouches for
    pub replicas: usize,
    pub success: bool,
    /// The object read, for OBJECT_READ
    pub value: Option<String>,
}

/// A client operation on the store, before it is routed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    BucketCreate { bucket: String },
    BucketDelete { bucket: String },
    ObjectCreate { bucket: String, key: String, value: String },
    ObjectRead { bucket: String, key: String },
    ObjectUpdate { bucket: String, key: String, value: String },
    ObjectDelete { bucket: String, key: String },
}

impl Request {
    pub fn request_type(&self) -> MessageType {
        match self {
            Request::BucketCreate { .. } => MessageType::BucketCreate,
            Request::BucketDelete { .. } => MessageType::BucketDelete,
            Request::ObjectCreate { .. } => MessageType::ObjectCreate,
            Request::ObjectRead { .. } => MessageType::ObjectRead,
            Request::ObjectUpdate { .. } => MessageType::ObjectUpdate,
            Request::ObjectDelete { .. } => MessageType::ObjectDelete,
        }
    }

    /// The key placed on the hash ring: buckets route by name, objects by key
    pub fn routing_key(&self) -> &str {
        match self {
            Request::BucketCreate { bucket } | Request::BucketDelete { bucket } => bucket,
            Request::ObjectCreate { key, .. }
            | Request::ObjectRead { key, .. }
            | Request::ObjectUpdate { key, .. }
            | Request::ObjectDelete { key, .. } => key,
        }
    }

    pub fn into_message(self, session: SessionId) -> Message {
        match self {
            Request::BucketCreate { bucket } => {
                Message::BucketCreate(BucketRequest { session, bucket })
            }
            Request::BucketDelete { bucket } => {
                Message::BucketDelete(BucketRequest { session, bucket })
            }
            Request::ObjectCreate { bucket, key, value } => Message::ObjectCreate(ObjectRequest {
                session,
                bucket,
                key,
                value: Some(value),
            }),
            Request::ObjectRead { bucket, key } => Message::ObjectRead(ObjectRequest {
                session,
                bucket,
                key,
                value: None,
            }),
            Request::ObjectUpdate { bucket, key, value } => Message::ObjectUpdate(ObjectRequest {
                session,
                bucket,
                key,
                value: Some(value),
            }),
            Request::ObjectDelete { bucket, key } => Message::ObjectDelete(ObjectRequest {
                session,
                bucket,
                key,
                value: None,
            }),
        }
    }
}
