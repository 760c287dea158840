use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::node::NodeId;

/// Emitted when a peer's timer runs out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expiry {
    pub node_id: NodeId,
    /// Identifies the arming of the timer that fired
    pub generation: u64,
}

/// The [FailureDetector] owns one timer per tracked peer.
///
/// A timer armed for a peer fires after `timeout` unless it is armed again (reset) or disarmed
/// before. Firing sends an [Expiry] on the channel returned by [FailureDetector::new]; whoever
/// consumes it must confirm with [FailureDetector::take_expired] that the timer was not
/// reset in the meantime. A timer therefore causes at most one removal per uninterrupted window.
#[derive(Debug)]
pub struct FailureDetector {
    timeout: Duration,
    timers: Mutex<Timers>,
    expiries: mpsc::UnboundedSender<Expiry>,
}

#[derive(Debug, Default)]
struct Timers {
    next_generation: u64,
    armed: HashMap<NodeId, Timer>,
}

#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl FailureDetector {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expiries, receiver) = mpsc::unbounded_channel();
        let detector = Self {
            timeout,
            timers: Mutex::new(Timers::default()),
            expiries,
        };
        (detector, receiver)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the timer of `node_id`, or restarts it if it is already running
    pub fn arm(&self, node_id: &NodeId) {
        let mut timers = self.timers();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let expiry = Expiry {
            node_id: node_id.clone(),
            generation,
        };
        let expiries = self.expiries.clone();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expiries.send(expiry);
        });

        if let Some(previous) = timers
            .armed
            .insert(node_id.clone(), Timer { generation, handle })
        {
            previous.handle.abort();
        }
    }

    pub fn disarm(&self, node_id: &NodeId) {
        if let Some(timer) = self.timers().armed.remove(node_id) {
            timer.handle.abort();
        }
    }

    pub fn is_armed(&self, node_id: &NodeId) -> bool {
        self.timers().armed.contains_key(node_id)
    }

    #[cfg(test)]
    pub(crate) fn generation_of(&self, node_id: &NodeId) -> Option<u64> {
        self.timers().armed.get(node_id).map(|t| t.generation)
    }

    /// Returns true, and forgets the timer, if `expiry` comes from the current arming of its
    /// node's timer. Stale expiries of timers that were reset or disarmed since return false.
    pub fn take_expired(&self, expiry: &Expiry) -> bool {
        let mut timers = self.timers();
        match timers.armed.get(&expiry.node_id) {
            Some(timer) if timer.generation == expiry.generation => {
                timers.armed.remove(&expiry.node_id);
                true
            }
            _ => false,
        }
    }
}

impl Drop for FailureDetector {
    fn drop(&mut self) {
        for (_, timer) in self.timers().armed.drain() {
            timer.handle.abort();
        }
    }
}
