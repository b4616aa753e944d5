//! KEEPSAKE - Engine Metrics & Observability
//! Atomic counters for tracking engine operations in a lock-free,
//! thread-safe manner using `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic operation counters for the storage engine.
///
/// All counters use `Ordering::Relaxed`; they are for observability only.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Successful `create` operations.
    pub creates: AtomicU64,
    /// `get` operations, hits and misses alike.
    pub gets: AtomicU64,
    /// Successful `delete` operations.
    pub deletes: AtomicU64,
    /// `delete_all` operations.
    pub clears: AtomicU64,
    /// Expired records dropped from the map.
    pub reclaimed: AtomicU64,
    /// Snapshot writes that reached disk.
    pub persists: AtomicU64,
    /// Writes refused by validation, duplicate check or size limit.
    pub rejected: AtomicU64,
    /// Total snapshot bytes written.
    pub bytes_written: AtomicU64,
    /// Timestamp when the engine was opened.
    engine_started: Instant,
}

impl EngineMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            creates: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            clears: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            persists: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            engine_started: Instant::now(),
        }
    }

    pub fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaimed(&self, count: usize) {
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_persist(&self, bytes: usize) {
        self.persists.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get engine uptime in seconds.
    pub fn uptime_secs(&self) -> f64 {
        self.engine_started.elapsed().as_secs_f64()
    }

    /// Total CRD operations (creates + gets + deletes + clears).
    pub fn total_ops(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
            + self.gets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.clears.load(Ordering::Relaxed)
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "\n═══ KEEPSAKE Engine Metrics ═══\n\
             Operations:\n\
               creates:   {}\n\
               gets:      {}\n\
               deletes:   {}\n\
               clears:    {}\n\
               rejected:  {}\n\
             Expiry:\n\
               reclaimed: {}\n\
             I/O:\n\
               persists:  {}\n\
               written:   {} bytes\n\
             Uptime: {:.2}s",
            self.creates.load(Ordering::Relaxed),
            self.gets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.clears.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.reclaimed.load(Ordering::Relaxed),
            self.persists.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
