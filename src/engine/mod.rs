//! KEEPSAKE - Storage Engine Module
//! Owns the in-memory record map and its on-disk snapshot.

pub mod expiry;
pub mod metrics;
pub mod snapshot;
pub mod validator;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::error::{KeepsakeError, Result};
use crate::types::{Document, Record};

use self::expiry::Clock;
use self::metrics::EngineMetrics;
use self::snapshot::{RecordMap, SnapshotFile};
use self::validator::Validator;

/// The core storage engine.
///
/// Every operation runs under one mutex, so operations are linearizable
/// and no two snapshot writes interleave. The map is the source of truth
/// for the lifetime of the engine; disk is only read at [`StorageEngine::open`].
///
/// A failed mutation restores the map to its previous contents, so memory
/// never runs ahead of the last snapshot that reached disk.
pub struct StorageEngine {
    records: Mutex<RecordMap>,
    snapshot: SnapshotFile,
    validator: Validator,
    max_store_size: usize,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
}

impl StorageEngine {
    /// Open the snapshot at `path`, or seed an empty one if none exists.
    pub fn open(path: PathBuf, config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let snapshot = SnapshotFile::new(path, config.sync_writes);
        let records = snapshot.load()?;
        let seed = !snapshot.exists();

        let engine = Self {
            records: Mutex::new(records),
            snapshot,
            validator: Validator::from_config(config),
            max_store_size: config.max_store_size,
            clock,
            metrics: EngineMetrics::new(),
        };

        if seed {
            engine.persist(&RecordMap::new())?;
        }

        log::info!(
            "Keepsake engine opened at {:?} ({} records loaded)",
            engine.snapshot.path(),
            engine.lock().len()
        );
        Ok(engine)
    }

    /// Insert a new record. Fails if a live record already holds `key`;
    /// an expired one is replaced and gets a fresh `created_at`.
    pub fn create(&self, key: &str, value: Document, ttl_seconds: Option<u64>) -> Result<()> {
        let mut records = self.lock();

        if let Err(e) = self
            .validator
            .validate(key, &value)
            .and_then(|_| self.validator.validate_ttl(ttl_seconds))
        {
            self.metrics.record_rejected();
            return Err(e.into());
        }

        let now = self.clock.now_ms();
        if let Some(existing) = records.get(key) {
            if expiry::is_live(existing.created_at, existing.ttl_seconds, now) {
                self.metrics.record_rejected();
                return Err(KeepsakeError::DuplicateKey(key.to_owned()));
            }
        }

        let previous = records.insert(key.to_owned(), Record::new(value, now, ttl_seconds));
        if let Err(e) = self.persist(&records) {
            match previous {
                Some(record) => records.insert(key.to_owned(), record),
                None => records.remove(key),
            };
            if matches!(e, KeepsakeError::StoreFull { .. }) {
                self.metrics.record_rejected();
            }
            log::warn!("create '{}' rolled back: {}", key, e);
            return Err(e);
        }

        if previous.is_some() {
            self.metrics.record_reclaimed(1);
            log::debug!("reclaimed expired slot '{}'", key);
        }
        self.metrics.record_create();
        log::debug!("created '{}' (ttl {:?})", key, ttl_seconds);
        Ok(())
    }

    /// Fetch the value stored under `key`. Expired keys read as absent.
    pub fn get(&self, key: &str) -> Result<Document> {
        let mut records = self.lock();
        self.metrics.record_get();

        if !self.check_live(&mut records, key) {
            return Err(KeepsakeError::NotFound(key.to_owned()));
        }
        records
            .get(key)
            .map(|record| record.value.clone())
            .ok_or_else(|| KeepsakeError::NotFound(key.to_owned()))
    }

    /// Remove a live record and persist.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.lock();

        if !self.check_live(&mut records, key) {
            return Err(KeepsakeError::NotFound(key.to_owned()));
        }
        let removed = records
            .remove(key)
            .ok_or_else(|| KeepsakeError::NotFound(key.to_owned()))?;

        if let Err(e) = self.persist(&records) {
            records.insert(key.to_owned(), removed);
            log::warn!("delete '{}' rolled back: {}", key, e);
            return Err(e);
        }

        self.metrics.record_delete();
        log::debug!("deleted '{}'", key);
        Ok(())
    }

    /// Drop every record, live or not, and persist an empty snapshot.
    pub fn delete_all(&self) -> Result<()> {
        let mut records = self.lock();

        let previous = std::mem::take(&mut *records);
        if let Err(e) = self.persist(&records) {
            *records = previous;
            log::warn!("delete_all rolled back: {}", e);
            return Err(e);
        }

        self.metrics.record_clear();
        log::debug!("cleared {} records", previous.len());
        Ok(())
    }

    /// Time left before `key` expires; `None` for records without a TTL.
    pub fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut records = self.lock();

        if !self.check_live(&mut records, key) {
            return Err(KeepsakeError::NotFound(key.to_owned()));
        }
        let now = self.clock.now_ms();
        Ok(records
            .get(key)
            .and_then(|r| expiry::remaining_ms(r.created_at, r.ttl_seconds, now))
            .map(Duration::from_millis))
    }

    /// Drop every expired record and persist if anything changed.
    /// Returns the number of records removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut records = self.lock();
        let now = self.clock.now_ms();

        let expired: Vec<_> = records
            .iter()
            .filter(|(_, r)| !expiry::is_live(r.created_at, r.ttl_seconds, now))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let removed: Vec<_> = expired
            .into_iter()
            .filter_map(|key| records.remove(&key).map(|record| (key, record)))
            .collect();

        if let Err(e) = self.persist(&records) {
            records.extend(removed);
            log::warn!("purge rolled back: {}", e);
            return Err(e);
        }

        let purged = removed.len();
        self.metrics.record_reclaimed(purged);
        log::debug!("purged {} expired records", purged);
        Ok(purged)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let records = self.lock();
        let now = self.clock.now_ms();
        records
            .values()
            .filter(|r| expiry::is_live(r.created_at, r.ttl_seconds, now))
            .count()
    }

    /// Returns true if no live record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the path to the snapshot file.
    pub fn path(&self) -> &Path {
        self.snapshot.path()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Liveness check on the read path. An expired record is removed from
    /// the map here, under the engine mutex, so it is reclaimed exactly once.
    /// The removal is not persisted; the next mutation's snapshot drops it.
    fn check_live(&self, records: &mut RecordMap, key: &str) -> bool {
        let now = self.clock.now_ms();
        let live = match records.get(key) {
            Some(r) => expiry::is_live(r.created_at, r.ttl_seconds, now),
            None => return false,
        };
        if !live {
            records.remove(key);
            self.metrics.record_reclaimed(1);
            log::debug!("reclaimed expired '{}' on lookup", key);
        }
        live
    }

    fn persist(&self, records: &RecordMap) -> Result<()> {
        let bytes = SnapshotFile::encode(records)?;
        if bytes.len() > self.max_store_size {
            return Err(KeepsakeError::StoreFull {
                size: bytes.len(),
                limit: self.max_store_size,
            });
        }
        self.snapshot.write(&bytes)?;
        self.metrics.record_persist(bytes.len());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RecordMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use expiry::ManualClock;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::thread;

    struct Fixture {
        _dir: tempfile::TempDir,
        data_dir: PathBuf,
        path: PathBuf,
        config: Config,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let data_dir = dir.path().join("data");
            std::fs::create_dir(&data_dir).unwrap();
            let path = data_dir.join("store.json");
            let config = Config::new(&data_dir).with_sync_writes(false);
            Self {
                _dir: dir,
                data_dir,
                path,
                config,
                clock: Arc::new(ManualClock::new(1_000_000)),
            }
        }

        fn open(&self) -> StorageEngine {
            StorageEngine::open(self.path.clone(), &self.config, self.clock.clone()).unwrap()
        }

        /// Remove the data directory so every snapshot write fails.
        fn break_storage(&self) {
            std::fs::remove_dir_all(&self.data_dir).unwrap();
        }

        fn restore_storage(&self) {
            std::fs::create_dir(&self.data_dir).unwrap();
        }
    }

    #[test]
    fn test_open_seeds_empty_snapshot() {
        let fx = Fixture::new();
        let engine = fx.open();
        assert!(engine.is_empty());
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), "{}");
    }

    #[test]
    fn test_create_get_round_trip() {
        let fx = Fixture::new();
        let engine = fx.open();
        let doc = json!({"name": "keepsake", "tags": ["a", "b"], "n": 1.5});

        engine.create("doc", doc.clone(), None).unwrap();
        assert_eq!(engine.get("doc").unwrap(), doc);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected_and_original_kept() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("k", json!({"v": 1}), None).unwrap();

        let err = engine.create("k", json!({"v": 2}), None).unwrap_err();
        assert!(matches!(err, KeepsakeError::DuplicateKey(ref k) if k == "k"));
        assert_eq!(engine.get("k").unwrap(), json!({"v": 1}));
    }

    #[test]
    fn test_validation_errors_leave_store_unchanged() {
        let fx = Fixture::new();
        let engine = fx.open();

        let err = engine.create("", json!({}), None).unwrap_err();
        assert!(matches!(err, KeepsakeError::Validation(ValidationError::KeyEmpty)));

        let err = engine.create("k", json!([1]), None).unwrap_err();
        assert!(matches!(
            err,
            KeepsakeError::Validation(ValidationError::ValueNotStructured(_))
        ));

        let err = engine.create("k", json!({}), Some(0)).unwrap_err();
        assert!(matches!(
            err,
            KeepsakeError::Validation(ValidationError::TtlNotPositive)
        ));

        assert!(engine.is_empty());
        assert_eq!(engine.metrics().rejected.load(Ordering::Relaxed), 3);
        // Only the seed snapshot was written.
        assert_eq!(engine.metrics().persists.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_ttl_expiry_and_lazy_reclaim() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("session", json!({"t": "abc"}), Some(1)).unwrap();

        fx.clock.advance_ms(999);
        assert_eq!(engine.get("session").unwrap(), json!({"t": "abc"}));

        fx.clock.advance_ms(1);
        assert!(matches!(engine.get("session"), Err(KeepsakeError::NotFound(_))));
        assert_eq!(engine.metrics().reclaimed.load(Ordering::Relaxed), 1);

        // Already reclaimed: a second miss does not count again.
        assert!(engine.get("session").is_err());
        assert_eq!(engine.metrics().reclaimed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_create_reclaims_expired_slot() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("k", json!({"v": 1}), Some(1)).unwrap();

        fx.clock.advance_secs(2);
        engine.create("k", json!({"v": 2}), None).unwrap();
        assert_eq!(engine.get("k").unwrap(), json!({"v": 2}));
        assert_eq!(engine.remaining_ttl("k").unwrap(), None);
    }

    #[test]
    fn test_delete_semantics() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("k", json!({}), None).unwrap();

        engine.delete("k").unwrap();
        assert!(matches!(engine.get("k"), Err(KeepsakeError::NotFound(_))));
        assert!(matches!(engine.delete("k"), Err(KeepsakeError::NotFound(_))));
    }

    #[test]
    fn test_delete_expired_is_not_found() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("k", json!({}), Some(5)).unwrap();

        fx.clock.advance_secs(5);
        assert!(matches!(engine.delete("k"), Err(KeepsakeError::NotFound(_))));
        assert_eq!(engine.metrics().deletes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_delete_all() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.delete_all().unwrap();

        for i in 0..10 {
            engine.create(&format!("k{}", i), json!({"i": i}), None).unwrap();
        }
        engine.delete_all().unwrap();
        for i in 0..10 {
            assert!(engine.get(&format!("k{}", i)).is_err());
        }
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), "{}");
    }

    #[test]
    fn test_state_survives_reopen() {
        let fx = Fixture::new();
        {
            let engine = fx.open();
            engine.create("keep", json!({"v": 1}), None).unwrap();
            engine.create("short", json!({"v": 2}), Some(10)).unwrap();
            engine.create("gone", json!({"v": 3}), None).unwrap();
            engine.delete("gone").unwrap();
        }

        fx.clock.advance_secs(4);
        let engine = fx.open();
        assert_eq!(engine.get("keep").unwrap(), json!({"v": 1}));
        assert!(engine.get("gone").is_err());
        // created_at is persisted, so the TTL keeps counting across reopen.
        assert_eq!(
            engine.remaining_ttl("short").unwrap(),
            Some(Duration::from_secs(6))
        );

        fx.clock.advance_secs(6);
        assert!(engine.get("short").is_err());
    }

    #[test]
    fn test_store_full_rolls_back() {
        let fx = Fixture::new();
        let config = fx.config.clone().with_max_value_size(64).with_max_store_size(100);
        let engine = StorageEngine::open(fx.path.clone(), &config, fx.clock.clone()).unwrap();

        engine.create("a", json!({"v": 1}), None).unwrap();
        let err = engine
            .create("b", json!({"v": "0123456789012345678901234567890123456789"}), None)
            .unwrap_err();
        assert!(matches!(err, KeepsakeError::StoreFull { limit: 100, .. }));
        assert!(engine.get("b").is_err());
        assert_eq!(engine.get("a").unwrap(), json!({"v": 1}));
    }

    #[test]
    fn test_purge_expired() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("old1", json!({}), Some(1)).unwrap();
        engine.create("old2", json!({}), Some(1)).unwrap();
        engine.create("fresh", json!({}), Some(60)).unwrap();
        engine.create("forever", json!({}), None).unwrap();

        assert_eq!(engine.purge_expired().unwrap(), 0);
        fx.clock.advance_secs(2);
        assert_eq!(engine.purge_expired().unwrap(), 2);
        assert_eq!(engine.len(), 2);

        let on_disk = SnapshotFile::new(fx.path.clone(), false).load().unwrap();
        assert_eq!(on_disk.len(), 2);
    }

    #[test]
    fn test_failed_create_rolls_back() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("old", json!({}), Some(1)).unwrap();
        fx.clock.advance_secs(1);

        fx.break_storage();
        assert!(matches!(
            engine.create("new", json!({}), None),
            Err(KeepsakeError::Io(_))
        ));
        assert!(matches!(
            engine.create("old", json!({"v": 2}), None),
            Err(KeepsakeError::Io(_))
        ));
        assert!(engine.get("new").is_err());
        assert!(engine.get("old").is_err());
        assert_eq!(engine.metrics().creates.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_delete_rolls_back() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("k", json!({"v": 1}), None).unwrap();

        fx.break_storage();
        assert!(matches!(engine.delete("k"), Err(KeepsakeError::Io(_))));
        assert_eq!(engine.get("k").unwrap(), json!({"v": 1}));
        assert_eq!(engine.metrics().deletes.load(Ordering::Relaxed), 0);

        fx.restore_storage();
        engine.delete("k").unwrap();
        assert!(engine.get("k").is_err());
    }

    #[test]
    fn test_failed_delete_all_rolls_back() {
        let fx = Fixture::new();
        let engine = fx.open();
        for i in 0..5 {
            engine.create(&format!("k{}", i), json!({"i": i}), None).unwrap();
        }

        fx.break_storage();
        assert!(matches!(engine.delete_all(), Err(KeepsakeError::Io(_))));
        assert_eq!(engine.len(), 5);
        for i in 0..5 {
            assert_eq!(engine.get(&format!("k{}", i)).unwrap(), json!({"i": i}));
        }

        fx.restore_storage();
        engine.delete_all().unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_failed_purge_rolls_back() {
        let fx = Fixture::new();
        let engine = fx.open();
        engine.create("old1", json!({}), Some(1)).unwrap();
        engine.create("old2", json!({}), Some(1)).unwrap();
        engine.create("keep", json!({"v": 1}), None).unwrap();
        fx.clock.advance_secs(1);

        fx.break_storage();
        assert!(matches!(engine.purge_expired(), Err(KeepsakeError::Io(_))));
        assert_eq!(engine.get("keep").unwrap(), json!({"v": 1}));
        assert_eq!(engine.metrics().reclaimed.load(Ordering::Relaxed), 0);

        // The expired records are back in the map, so a retry finds them.
        fx.restore_storage();
        assert_eq!(engine.purge_expired().unwrap(), 2);
        assert_eq!(engine.metrics().reclaimed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_concurrent_readers_reclaim_once() {
        let fx = Fixture::new();
        let engine = Arc::new(fx.open());
        engine.create("k", json!({}), Some(1)).unwrap();
        fx.clock.advance_secs(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || engine.get("k").is_err())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(engine.metrics().reclaimed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_concurrent_creates_single_winner() {
        let fx = Fixture::new();
        let engine = Arc::new(fx.open());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                thread::spawn(move || engine.create("race", json!({"winner": i}), None).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_fails_open() {
        let fx = Fixture::new();
        std::fs::write(&fx.path, b"[1, 2").unwrap();
        let result = StorageEngine::open(fx.path.clone(), &fx.config, fx.clock.clone());
        assert!(matches!(result, Err(KeepsakeError::Corruption(_))));
    }
}
