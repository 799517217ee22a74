//! Process-local broker counters.
//!
//! Plain atomics, no exporter.  `snapshot` is the only read surface.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BrokerMetrics {
    received: AtomicU64,
    routed: AtomicU64,
    broadcasts: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    unknown_receiver: AtomicU64,
    retransmissions: AtomicU64,
    ack_timeouts: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Well-formed frames accepted by the routing engine.
    pub received: u64,
    /// Point-to-point deliveries.
    pub routed: u64,
    /// Broadcast fan-outs (including broker heartbeats).
    pub broadcasts: u64,
    /// Frames dropped because their id was already seen.
    pub duplicates: u64,
    /// Frames dropped at decode.
    pub malformed: u64,
    /// Point-to-point sends whose target was not registered.
    pub unknown_receiver: u64,
    /// Ack-driven retransmissions.
    pub retransmissions: u64,
    /// Tracked messages dropped after exhausting retries.
    pub ack_timeouts: u64,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_unknown_receiver(&self) {
        self.unknown_receiver.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_receiver: self.unknown_receiver.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
        }
    }
}
