//! KEEPSAKE - Expiry Policy
//! Decides whether a record is still live at a given instant.
//!
//! All instants are Unix epoch milliseconds. The policy never reads the
//! wall clock itself; the engine asks its [`Clock`] and passes `now` in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Expiration instant for a record, or `None` when it has no TTL.
pub fn expires_at(created_at: u64, ttl_seconds: Option<u64>) -> Option<u64> {
    ttl_seconds.map(|ttl| created_at.saturating_add(ttl.saturating_mul(1000)))
}

/// Returns `true` while `now < created_at + ttl`.
/// A lookup at exactly the expiry instant is already expired.
pub fn is_live(created_at: u64, ttl_seconds: Option<u64>, now: u64) -> bool {
    match expires_at(created_at, ttl_seconds) {
        Some(deadline) => now < deadline,
        None => true, // No TTL = never expires
    }
}

/// Milliseconds left before expiry.
/// Returns `None` if the record has no TTL, `Some(0)` once it has expired.
pub fn remaining_ms(created_at: u64, ttl_seconds: Option<u64>, now: u64) -> Option<u64> {
    expires_at(created_at, ttl_seconds).map(|deadline| deadline.saturating_sub(now))
}

/// Source of the current instant for the storage engine.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to. Useful for exercising TTLs
/// without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
