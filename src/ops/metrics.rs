//! Counters for hub fan-out activity.
//!
//! Cheap atomics, shared via `Arc`, snapshotted for scraping or assertions.
//! Ack timeouts are counted here because the operation itself completes
//! successfully and would otherwise be invisible.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct HubMetrics {
    published: AtomicU64,
    received: AtomicU64,
    write_failures: AtomicU64,
    handler_failures: AtomicU64,
    ack_timeouts: AtomicU64,
}

/// Point-in-time view of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub received: u64,
    pub write_failures: u64,
    pub handler_failures: u64,
    pub ack_timeouts: u64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
        }
    }
}
