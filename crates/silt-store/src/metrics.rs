#![forbid(unsafe_code)]
//! Operation counters shared between the producer and the persister.
//!
//! Counters are diagnostics, not synchronization: all accesses are
//! `Relaxed`, and a snapshot is not an atomic cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one open store.
#[derive(Debug, Default)]
pub(crate) struct StoreMetrics {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    blocks_enqueued: AtomicU64,
    blocks_persisted: AtomicU64,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    current_hits: AtomicU64,
    ring_hits: AtomicU64,
    cache_hits: AtomicU64,
    device_fills: AtomicU64,
    flushes: AtomicU64,
}

impl StoreMetrics {
    pub(crate) fn record_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueue(&self) {
        self.blocks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist(&self) {
        self.blocks_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_current_hit(&self) {
        self.current_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ring_hit(&self) {
        self.ring_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_device_fill(&self) {
        self.device_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            blocks_enqueued: self.blocks_enqueued.load(Ordering::Relaxed),
            blocks_persisted: self.blocks_persisted.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            current_hits: self.current_hits.load(Ordering::Relaxed),
            ring_hits: self.ring_hits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            device_fills: self.device_fills.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// `append` calls accepted.
    pub appends: u64,
    /// Total payload bytes appended.
    pub bytes_appended: u64,
    /// Full blocks handed to the write-back ring (flush padding included).
    pub blocks_enqueued: u64,
    /// Blocks whose device write completed.
    pub blocks_persisted: u64,
    /// `read_at` calls accepted.
    pub reads: u64,
    /// Total bytes returned by reads.
    pub bytes_read: u64,
    /// Per-block reads served from the still-filling current block.
    pub current_hits: u64,
    /// Per-block reads served from an in-flight ring slot.
    pub ring_hits: u64,
    /// Per-block reads served from the read cache.
    pub cache_hits: u64,
    /// Per-block reads that went to the device (filling the cache).
    pub device_fills: u64,
    /// `flush` calls completed.
    pub flushes: u64,
}
