use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters for one job factory binding
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    fired: AtomicU64,
    decode_failures: AtomicU64,
    enqueued: AtomicU64,
    enqueue_failures: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A manual-ack callback started waiting
    pub fn begin_wait(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    /// A manual-ack callback stopped waiting
    pub fn end_wait(&self, acked: bool) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if acked {
            self.acked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nacked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Callbacks currently blocked on an acknowledgement
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fired: self.fired.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time copy of [`BridgeMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub fired: u64,
    pub decode_failures: u64,
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub acked: u64,
    pub nacked: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}
