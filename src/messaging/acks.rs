//! Pending-acknowledgement tracking for cross-server group mutations.
//!
//! A server that asks a peer to mutate group membership allocates a
//! correlation id, registers a pending ack, and waits for the peer's
//! acknowledgement on its private inbox. Waits are bounded: a timed-out ack
//! completes the operation successfully, because the originator cannot tell
//! an unknown connection apart from a network partition.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of waiting on a pending acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    TimedOut,
}

/// A registered wait for one correlation id.
#[derive(Debug)]
pub struct PendingAck {
    id: u64,
    rx: oneshot::Receiver<()>,
}

impl PendingAck {
    pub fn correlation_id(&self) -> u64 {
        self.id
    }
}

/// Allocates correlation ids and completes their waiters.
#[derive(Debug)]
pub struct AckTracker {
    pending: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_correlation: AtomicU64,
    timeout: Duration,
}

impl AckTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_correlation: AtomicU64::new(0),
            timeout,
        }
    }

    /// Allocate a correlation id and register a waiter for it.
    pub fn create_ack(&self) -> PendingAck {
        let id = self.next_correlation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        PendingAck { id, rx }
    }

    /// Complete the waiter for `correlation_id`. Repeated triggers and acks
    /// arriving after the waiter is gone are ignored.
    pub fn trigger_ack(&self, correlation_id: u64) {
        let sender = self.pending.lock().remove(&correlation_id);
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    /// Wait for the acknowledgement or the tracker's timeout, whichever comes
    /// first. The pending entry is dropped either way, so a late ack is
    /// discarded silently.
    pub async fn wait(&self, ack: PendingAck) -> AckOutcome {
        match tokio::time::timeout(self.timeout, ack.rx).await {
            Ok(_) => AckOutcome::Acknowledged,
            Err(_) => {
                self.pending.lock().remove(&ack.id);
                AckOutcome::TimedOut
            }
        }
    }

    /// Complete every outstanding waiter; used on teardown.
    pub fn dispose(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_completes_the_waiter() {
        let tracker = AckTracker::new(Duration::from_secs(5));
        let ack = tracker.create_ack();
        tracker.trigger_ack(ack.correlation_id());
        assert_eq!(tracker.wait(ack).await, AckOutcome::Acknowledged);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn correlation_ids_are_unique_and_increasing() {
        let tracker = AckTracker::new(Duration::from_secs(5));
        let first = tracker.create_ack();
        let second = tracker.create_ack();
        assert!(second.correlation_id() > first.correlation_id());
    }

    #[tokio::test]
    async fn repeated_triggers_are_ignored() {
        let tracker = AckTracker::new(Duration::from_secs(5));
        let ack = tracker.create_ack();
        let id = ack.correlation_id();
        tracker.trigger_ack(id);
        tracker.trigger_ack(id);
        tracker.trigger_ack(id + 100);
        assert_eq!(tracker.wait(ack).await, AckOutcome::Acknowledged);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_completes_and_discards_the_entry() {
        let tracker = AckTracker::new(Duration::from_millis(50));
        let ack = tracker.create_ack();
        let id = ack.correlation_id();
        assert_eq!(tracker.wait(ack).await, AckOutcome::TimedOut);
        assert_eq!(tracker.pending_count(), 0);
        // The late ack has nothing left to complete.
        tracker.trigger_ack(id);
    }

    #[tokio::test]
    async fn dispose_completes_outstanding_waiters() {
        let tracker = AckTracker::new(Duration::from_secs(60));
        let ack = tracker.create_ack();
        tracker.dispose();
        assert_eq!(tracker.wait(ack).await, AckOutcome::Acknowledged);
    }
}
