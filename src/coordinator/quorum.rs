use std::collections::HashSet;

use tokio::time::Instant;

use crate::{
    node::NodeId,
    transport::{Acknowledgement, MessageType, SessionId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fewer acknowledgements than required, deadline not reached
    Waiting,
    /// Enough acknowledgements were received. Terminal.
    Satisfied,
    /// The deadline passed first. Terminal.
    TimedOut,
}

/// Collects the acknowledgements of one fan-out until `required` distinct replicas answered
/// or the deadline passed.
///
/// The success flag is the logical AND of every acknowledgement recorded. Acknowledgements of
/// other sessions or request types, repeated acknowledgements of one replica, and anything
/// arriving after the session ended are ignored.
#[derive(Debug)]
pub struct QuorumSession {
    id: SessionId,
    request_type: MessageType,
    required: usize,
    responders: HashSet<NodeId>,
    success: bool,
    value: Option<String>,
    deadline: Instant,
}

/// The result of a quorum session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub state: SessionState,
    pub request_type: MessageType,
    pub required: usize,
    pub received: usize,
    /// Logical AND of the success flags received, the best-known aggregate on timeout
    pub success: bool,
    /// First value received, for reads
    pub value: Option<String>,
}

impl QuorumOutcome {
    /// Whether the operation succeeded: the quorum was reached and every replica heard from succeeded
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Satisfied && self.success
    }

    pub fn is_timed_out(&self) -> bool {
        self.state == SessionState::TimedOut
    }
}

impl QuorumSession {
    pub fn new(
        id: SessionId,
        request_type: MessageType,
        required: usize,
        deadline: Instant,
    ) -> Self {
        Self {
            id,
            request_type,
            required: required.max(1),
            responders: HashSet::new(),
            success: true,
            value: None,
            deadline,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn received(&self) -> usize {
        self.responders.len()
    }

    pub fn state(&self, now: Instant) -> SessionState {
        if self.responders.len() >= self.required {
            SessionState::Satisfied
        } else if now >= self.deadline {
            SessionState::TimedOut
        } else {
            SessionState::Waiting
        }
    }

    /// Records the acknowledgement of replica `from` and returns the resulting state
    pub fn record(&mut self, from: &NodeId, ack: &Acknowledgement, now: Instant) -> SessionState {
        let state = self.state(now);
        if state != SessionState::Waiting {
            return state;
        }
        if ack.session != self.id || ack.request_type != self.request_type {
            log::debug!(
                "Ignoring {:?} acknowledgement of session {} in session {}",
                ack.request_type,
                ack.session,
                self.id
            );
            return state;
        }
        if !self.responders.insert(from.clone()) {
            log::debug!("Ignoring repeated acknowledgement from {}", from);
            return state;
        }

        self.success &= ack.success;
        if self.value.is_none() {
            self.value = ack.value.clone();
        }
        log::debug!(
            "ACK: quorum {} receives {} (session {})",
            self.required,
            self.responders.len(),
            self.id
        );
        self.state(now)
    }

    /// Ends the session. A session still waiting when it is concluded counts as timed out.
    pub fn outcome(&self, now: Instant) -> QuorumOutcome {
        let state = match self.state(now) {
            SessionState::Satisfied => SessionState::Satisfied,
            SessionState::Waiting | SessionState::TimedOut => SessionState::TimedOut,
        };
        QuorumOutcome {
            state,
            request_type: self.request_type,
            required: self.required,
            received: self.responders.len(),
            success: self.success,
            value: self.value.clone(),
        }
    }
}
