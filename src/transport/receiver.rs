use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
};

use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};

use super::{codec, message::Envelope, Channel};

/// Spawns the receiver of a persistent channel.
///
/// The task decodes every datagram arriving on `socket` and hands envelopes meant for `channel`
/// to `envelopes`. Malformed datagrams and messages of other channels are logged and dropped.
/// Transient socket errors are logged and skipped. The loop ends on any other socket error, or
/// when nobody consumes envelopes anymore.
pub(crate) fn spawn_receiver(
    socket: UdpSocket,
    channel: Channel,
    max_frame_size: usize,
    envelopes: mpsc::Sender<Envelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; max_frame_size];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    log::warn!("{:?} receiver skipped a failed read: {}", channel, e);
                    continue;
                }
                Err(e) => {
                    log::error!("{:?} receiver stopped, socket failed: {}", channel, e);
                    break;
                }
            };
            let Some(envelope) = accept(&buf[..len], src, channel) else {
                continue;
            };
            if envelopes.send(envelope).await.is_err() {
                log::debug!("{:?} receiver stopped, no consumer left", channel);
                break;
            }
        }
    })
}

/// Errors a UDP socket reports for a single datagram, such as the ICMP port unreachable some
/// platforms surface as `ConnectionReset` on the next read
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

pub(crate) fn accept(frame: &[u8], src: SocketAddr, channel: Channel) -> Option<Envelope> {
    match codec::decode(frame) {
        Ok(envelope) if envelope.message.channel() == channel => Some(envelope),
        Ok(envelope) => {
            log::warn!(
                "Dropping {:?} from {} received on the {:?} channel",
                envelope.message.message_type(),
                src,
                channel
            );
            None
        }
        Err(e) => {
            log::warn!("Dropping datagram from {}: {}", src, e);
            None
        }
    }
}
