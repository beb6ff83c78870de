//! Operation statistics
//!
//! Fire-and-forget counters filled in by the persister, caches and readers.
//! Recording never fails and never influences what an operation returns.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics sink shared by table operations.
#[derive(Debug, Default)]
pub struct Stats {
    /// Tables written by `persist`.
    pub tables_persisted: AtomicU64,
    /// Chunks written by `persist`.
    pub chunks_persisted: AtomicU64,
    /// Bytes written by `persist` (data + index).
    pub bytes_persisted: AtomicU64,
    /// Chunks skipped because the haver already stored them.
    pub chunks_skipped: AtomicU64,

    /// Conjoin operations completed.
    pub conjoins: AtomicU64,
    /// Source tables merged away by conjoins.
    pub tables_conjoined: AtomicU64,
    /// Chunks in conjoined tables.
    pub chunks_conjoined: AtomicU64,
    /// Bytes copied by conjoins.
    pub bytes_conjoined: AtomicU64,

    /// Tables opened.
    pub tables_opened: AtomicU64,
    /// Index cache hits on open.
    pub index_cache_hits: AtomicU64,
    /// Index cache misses on open (index re-parsed from disk).
    pub index_cache_misses: AtomicU64,

    /// Chunks read from table files.
    pub chunks_read: AtomicU64,
    /// Bytes read from table files.
    pub bytes_read: AtomicU64,
}

impl Stats {
    /// Create new stats.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the index cache hit rate (0.0 to 1.0).
    pub fn index_hit_rate(&self) -> f64 {
        let hits = self.index_cache_hits.load(Ordering::Relaxed);
        let misses = self.index_cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tables_persisted: load(&self.tables_persisted),
            chunks_persisted: load(&self.chunks_persisted),
            bytes_persisted: load(&self.bytes_persisted),
            chunks_skipped: load(&self.chunks_skipped),
            conjoins: load(&self.conjoins),
            tables_conjoined: load(&self.tables_conjoined),
            chunks_conjoined: load(&self.chunks_conjoined),
            bytes_conjoined: load(&self.bytes_conjoined),
            tables_opened: load(&self.tables_opened),
            index_cache_hits: load(&self.index_cache_hits),
            index_cache_misses: load(&self.index_cache_misses),
            chunks_read: load(&self.chunks_read),
            bytes_read: load(&self.bytes_read),
        }
    }
}

/// Plain copy of [`Stats`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tables_persisted: u64,
    pub chunks_persisted: u64,
    pub bytes_persisted: u64,
    pub chunks_skipped: u64,
    pub conjoins: u64,
    pub tables_conjoined: u64,
    pub chunks_conjoined: u64,
    pub bytes_conjoined: u64,
    pub tables_opened: u64,
    pub index_cache_hits: u64,
    pub index_cache_misses: u64,
    pub chunks_read: u64,
    pub bytes_read: u64,
}
