// ABOUTME: Counters for master connection churn
//
// Tracks:
// - Masters: started, failed handshakes, currently cached
// - Cache: evictions (LRU bound, stale replacement, close)
// - Stale masters detected and replaced on connect

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Muxer-level metrics
#[derive(Debug, Default)]
pub struct MuxMetrics {
    pub masters_started: AtomicU64,
    pub handshake_failures: AtomicU64,
    pub stale_replaced: AtomicU64,
    pub evictions: AtomicU64,
    pub active_masters: AtomicU32,
}

impl MuxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master_started(&self) {
        self.masters_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_master_replaced(&self) {
        self.stale_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn master_evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_masters(&self, count: u32) {
        self.active_masters.store(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            masters_started: self.masters_started.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            stale_replaced: self.stale_replaced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            active_masters: self.active_masters.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`MuxMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub masters_started: u64,
    pub handshake_failures: u64,
    pub stale_replaced: u64,
    pub evictions: u64,
    pub active_masters: u32,
}
