//! Datagram messaging between nodes.
//!
//! Delivery is connectionless, unordered and at-most-once: nothing here retransmits,
//! deduplicates or reorders. Resilience lives in the gossip and quorum layers above.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

pub mod codec;
pub mod message;
pub(crate) mod receiver;

pub use codec::DEFAULT_MAX_FRAME_SIZE;
pub use message::{
    Acknowledgement, BucketRequest, Channel, Envelope, Forward, Message, MessageType,
    ObjectRequest, Request, SessionId,
};

use crate::{node::Node, Result};

/// Sends envelopes to the channel their message type belongs to.
#[derive(Clone, Debug)]
pub struct Transport {
    max_frame_size: usize,
}

impl Transport {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// The address of `node` that listens on `channel`
    pub fn destination(node: &Node, channel: Channel) -> SocketAddr {
        match channel {
            Channel::Gossip => node.addr,
            Channel::Io => node.io_addr(),
            Channel::Ack => node.ack_addr(),
        }
    }

    pub async fn send(&self, to: &Node, envelope: &Envelope) -> Result<()> {
        let addr = Self::destination(to, envelope.message.channel());
        self.send_to(addr, envelope).await
    }

    /// Sends from a fresh ephemeral socket, closed as soon as the datagram is out
    pub async fn send_to(&self, addr: SocketAddr, envelope: &Envelope) -> Result<()> {
        let frame = codec::encode(envelope, self.max_frame_size)?;
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        log::trace!(
            "Sending {:?} ({} bytes) to {}",
            envelope.message.message_type(),
            frame.len(),
            addr
        );
        socket.send_to(&frame, addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::UdpSocket;

    use super::{codec, Channel, Envelope, Message, Transport};
    use crate::{node::test_node, Error};

    #[test]
    fn destinations_follow_the_channel() {
        let node = test_node("a", 7001);
        assert_eq!(Transport::destination(&node, Channel::Gossip), node.addr);
        assert_eq!(Transport::destination(&node, Channel::Io).port(), 9700);
        assert_eq!(Transport::destination(&node, Channel::Ack).port(), 9720);
    }

    #[tokio::test]
    async fn send_to_delivers_one_datagram() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = Transport::new(1500);
        let envelope = Envelope::new(test_node("a", 7001), Message::Ping);

        transport.send_to(addr, &envelope).await.unwrap();

        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let received = codec::decode(&buf[..len]).unwrap();
        assert_eq!(received.message, Message::Ping);
        assert_eq!(received.sender, envelope.sender);
    }

    #[tokio::test]
    async fn oversized_envelopes_are_not_sent() {
        let transport = Transport::new(16);
        let envelope = Envelope::new(test_node("a", 7001), Message::Ping);
        let result = transport
            .send_to("127.0.0.1:9".parse().unwrap(), &envelope)
            .await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }
}
