use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use tokio::{sync::oneshot, time::Instant};

use super::quorum::{QuorumOutcome, QuorumSession, SessionState};
use crate::{
    node::NodeId,
    transport::{Acknowledgement, Envelope, Message, MessageType, SessionId},
};

/// The quorum sessions in flight on a node, keyed by session id.
///
/// Every acknowledgement reaching the node's ack port goes through [SessionTable::dispatch],
/// which hands it to the session it names. Sessions of one node never share state, so any
/// number of them can wait at the same time.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<SessionId, OpenSession>>,
}

struct OpenSession {
    /// ACKNOWLEDGEMENT or FORWARD_ACK
    expected: MessageType,
    session: QuorumSession,
    done: Option<oneshot::Sender<()>>,
}

impl OpenSession {
    fn record(&mut self, from: &NodeId, ack: &Acknowledgement) -> SessionState {
        let state = self.session.record(from, ack, Instant::now());
        if state == SessionState::Satisfied {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
        state
    }
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, OpenSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a session under a fresh id, fed with the acknowledgements of type `expected`.
    ///
    /// The session is deregistered when the returned [Listening] is waited on or dropped.
    pub(crate) fn open(
        &self,
        request_type: MessageType,
        required: usize,
        deadline: Instant,
        expected: MessageType,
    ) -> Listening<'_> {
        let (done_sender, done) = oneshot::channel();
        let mut sessions = self.lock();
        let mut id: SessionId = rand::random();
        while sessions.contains_key(&id) {
            id = rand::random();
        }
        sessions.insert(
            id,
            OpenSession {
                expected,
                session: QuorumSession::new(id, request_type, required, deadline),
                done: Some(done_sender),
            },
        );
        Listening {
            table: self,
            id,
            deadline,
            done,
        }
    }

    /// Hands an envelope of the ack channel to the session it belongs to
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        let Envelope { sender, message } = envelope;
        let (kind, ack) = match message {
            Message::Acknowledgement(ack) => (MessageType::Acknowledgement, ack),
            Message::ForwardAck(ack) => (MessageType::ForwardAck, ack),
            other => {
                log::warn!(
                    "Unexpected {:?} from {} on the ack channel",
                    other.message_type(),
                    sender.id
                );
                return;
            }
        };

        let mut sessions = self.lock();
        let Some(open) = sessions.get_mut(&ack.session) else {
            log::debug!(
                "Ignoring {:?} from {} for closed session {}",
                kind,
                sender.id,
                ack.session
            );
            return;
        };
        if open.expected != kind {
            log::debug!(
                "Ignoring {:?} from {}, session {} expects {:?}",
                kind,
                sender.id,
                ack.session,
                open.expected
            );
            return;
        }
        if open.record(&sender.id, &ack) == SessionState::Satisfied {
            log::debug!("ACK: quorum achieved for {:?} {}", ack.request_type, ack.key);
        }
    }

    fn close(&self, id: SessionId) -> Option<QuorumSession> {
        self.lock().remove(&id).map(|open| open.session)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// An open session of a [SessionTable]
pub(crate) struct Listening<'a> {
    table: &'a SessionTable,
    id: SessionId,
    deadline: Instant,
    done: oneshot::Receiver<()>,
}

impl Listening<'_> {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    /// Records an acknowledgement produced on this node
    pub(crate) fn record(&self, from: &NodeId, ack: &Acknowledgement) -> SessionState {
        match self.table.lock().get_mut(&self.id) {
            Some(open) => open.record(from, ack),
            None => SessionState::TimedOut,
        }
    }

    /// Waits until the session is satisfied or its deadline passes, then closes it
    pub(crate) async fn wait(mut self) -> QuorumOutcome {
        let _ = tokio::time::timeout_at(self.deadline, &mut self.done).await;
        let now = Instant::now();
        match self.table.close(self.id) {
            Some(session) => session.outcome(now),
            // only this guard closes the session
            None => QuorumSession::new(self.id, MessageType::Acknowledgement, 1, self.deadline)
                .outcome(now),
        }
    }
}

impl Drop for Listening<'_> {
    fn drop(&mut self) {
        self.table.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::SessionTable;
    use crate::{
        coordinator::quorum::SessionState,
        node::test_node,
        transport::{Acknowledgement, Envelope, Message, MessageType},
    };

    fn ack(session: u64) -> Acknowledgement {
        Acknowledgement {
            session,
            request_type: MessageType::BucketCreate,
            key: "b1".into(),
            replicas: 1,
            success: true,
            value: None,
        }
    }

    fn envelope(from: &str, message: Message) -> Envelope {
        Envelope::new(test_node(from, 7001), message)
    }

    #[tokio::test]
    async fn acknowledgements_reach_the_session_they_name() {
        let table = SessionTable::new();
        let deadline = Instant::now() + Duration::from_secs(20);
        let first = table.open(MessageType::BucketCreate, 2, deadline, MessageType::Acknowledgement);
        let second = table.open(MessageType::BucketCreate, 1, deadline, MessageType::Acknowledgement);
        assert_ne!(first.id(), second.id());
        assert_eq!(table.len(), 2);

        table.dispatch(envelope("a", Message::Acknowledgement(ack(first.id()))));
        table.dispatch(envelope("b", Message::Acknowledgement(ack(second.id()))));
        table.dispatch(envelope("b", Message::Acknowledgement(ack(first.id()))));

        let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(first.wait(), second.wait())
        })
        .await
        .unwrap();
        assert_eq!(first.state, SessionState::Satisfied);
        assert_eq!(first.received, 2);
        assert_eq!(second.state, SessionState::Satisfied);
        assert_eq!(second.received, 1);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn sessions_only_count_the_acknowledgement_kind_they_expect() {
        let table = SessionTable::new();
        let listening = table.open(
            MessageType::BucketCreate,
            1,
            Instant::now() + Duration::from_millis(300),
            MessageType::ForwardAck,
        );
        table.dispatch(envelope("a", Message::Acknowledgement(ack(listening.id()))));
        table.dispatch(envelope("a", Message::Ping));
        table.dispatch(envelope("a", Message::ForwardAck(ack(listening.id().wrapping_add(1)))));

        let outcome = listening.wait().await;
        assert!(outcome.is_timed_out());
        assert_eq!(outcome.received, 0);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn local_acknowledgements_can_settle_a_session() {
        let table = SessionTable::new();
        let listening = table.open(
            MessageType::BucketCreate,
            1,
            Instant::now() + Duration::from_secs(20),
            MessageType::Acknowledgement,
        );
        let state = listening.record(&test_node("a", 7001).id, &ack(listening.id()));
        assert_eq!(state, SessionState::Satisfied);

        let outcome = tokio::time::timeout(Duration::from_secs(1), listening.wait())
            .await
            .unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn dropped_sessions_are_deregistered() {
        let table = SessionTable::new();
        let listening = table.open(
            MessageType::BucketCreate,
            2,
            Instant::now() + Duration::from_secs(20),
            MessageType::Acknowledgement,
        );
        let id = listening.id();
        drop(listening);
        assert_eq!(table.len(), 0);
        // late acknowledgements are dropped
        table.dispatch(envelope("a", Message::Acknowledgement(ack(id))));
        assert_eq!(table.len(), 0);
    }
}
