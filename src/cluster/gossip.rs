use std::net::SocketAddr;

use rand::{seq::SliceRandom, Rng};

use super::{directory::Directory, Cluster};
use crate::{
    transport::{Envelope, Message, Transport},
    Result,
};

/// Picks the destination of a gossip round uniformly at random among the active nodes.
///
/// Until some peer is known, rounds go to a random seed instead.
pub(crate) fn select_gossip_destination<R: Rng + ?Sized>(
    directory: &Directory,
    rng: &mut R,
) -> Option<SocketAddr> {
    let active: Vec<SocketAddr> = directory.active().map(|n| n.addr).collect();
    if active.is_empty() {
        directory.seeds().choose(rng).copied()
    } else {
        active.choose(rng).copied()
    }
}

impl Cluster {
    /// Runs one gossip round: increments and persists our heartbeat, then pushes the
    /// active node list to one peer.
    ///
    /// Returns the destination, if there was one. Failing to persist the heartbeat is logged
    /// and does not prevent the push.
    pub async fn gossip_round(&self, transport: &Transport) -> Result<Option<SocketAddr>> {
        let (heartbeat, envelope, destination) = {
            let mut directory = self.directory.lock().await;
            let heartbeat = directory.increment_heartbeat();
            let destination = select_gossip_destination(&directory, &mut rand::thread_rng());
            let envelope = Envelope::new(
                directory.this_node().clone(),
                Message::NodeList(directory.active().cloned().collect()),
            );
            (heartbeat, envelope, destination)
        };

        if let Some(store) = &self.heartbeat_store {
            if let Err(e) = store.store(heartbeat).await {
                log::warn!("Could not persist heartbeat {}: {}", heartbeat, e);
            }
        }

        let Some(destination) = destination else {
            return Ok(None);
        };
        transport.send_to(destination, &envelope).await?;
        Ok(Some(destination))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use rand::{rngs::StdRng, SeedableRng};
    use tokio::net::UdpSocket;

    use super::select_gossip_destination;
    use crate::{
        cluster::{directory::Directory, Cluster},
        heartbeat::HeartbeatStore,
        node::{test_node, NodeId},
        transport::{codec, Message, Transport},
    };

    #[test]
    fn seeds_are_used_until_a_peer_is_known() {
        let seed = "127.0.0.1:7100".parse().unwrap();
        let mut directory = Directory::new(test_node("self", 7000), vec![seed]);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select_gossip_destination(&directory, &mut rng), Some(seed));

        directory.merge(test_node("a", 7001), vec![]);
        assert_eq!(
            select_gossip_destination(&directory, &mut rng),
            Some("127.0.0.1:7001".parse().unwrap())
        );
    }

    #[test]
    fn destinations_spread_over_the_active_set() {
        let mut directory = Directory::new(test_node("self", 7000), vec![]);
        directory.merge(
            test_node("a", 7001),
            vec![test_node("b", 7002), test_node("c", 7003)],
        );
        let mut rng = StdRng::seed_from_u64(42);
        let picked: HashSet<_> = (0..200)
            .filter_map(|_| select_gossip_destination(&directory, &mut rng))
            .map(|addr| addr.port())
            .collect();
        assert_eq!(picked, [7001, 7002, 7003].into_iter().collect());
    }

    #[test]
    fn lonely_nodes_have_nobody_to_gossip_with() {
        let directory = Directory::new(test_node("self", 7000), vec![]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_gossip_destination(&directory, &mut rng), None);
    }

    #[tokio::test]
    async fn round_persists_the_heartbeat_and_pushes_the_active_list() {
        let dir = tempfile::tempdir().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut peer_node = test_node("peer", 0);
        peer_node.addr = peer.local_addr().unwrap();

        let store = HeartbeatStore::new(dir.path(), &NodeId::new("self"));
        let (cluster, _expiries) = Cluster::new(
            test_node("self", 7000),
            vec![],
            3,
            2,
            Duration::from_secs(60),
            Some(store.clone()),
        );
        cluster.merge_node_list(peer_node.clone(), vec![]).await;

        let transport = Transport::new(1500);
        let destination = cluster.gossip_round(&transport).await.unwrap();
        assert_eq!(destination, Some(peer_node.addr));
        assert_eq!(store.load().await.unwrap(), Some(1));

        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let envelope = codec::decode(&buf[..len]).unwrap();
        assert_eq!(envelope.sender.id, NodeId::new("self"));
        assert_eq!(envelope.sender.heartbeat, 1);
        assert_eq!(envelope.message, Message::NodeList(vec![peer_node]));
    }
}
