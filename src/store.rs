//! KEEPSAKE - Store Facade
//! Public create/get/delete surface and the per-path instance registry.
//!
//! ## Concurrency Model
//! - A [`Store`] is a cheap `Clone` handle; clones share one engine.
//! - CRD operations take a **read lock** on the handle's lease, so they
//!   run concurrently up to the engine's own mutex.
//! - [`Store::close`] takes the **write lock**, waits for in-flight
//!   operations, and releases the process lock.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::expiry::{Clock, SystemClock};
use crate::engine::metrics::EngineMetrics;
use crate::engine::StorageEngine;
use crate::error::{KeepsakeError, LockError, Result, ValidationError};
use crate::engine::snapshot::has_reserved_suffix;
use crate::lock::{lock_path_for, LockHandle};
use crate::types::Document;

type OpenPaths = Arc<Mutex<HashSet<PathBuf>>>;

/// Tracks which paths have a live [`Store`] in this process and hands out
/// new ones. Clones share the same set of open paths.
///
/// ## Example
/// ```no_run
/// use keepsake::{config::Config, store::StoreRegistry};
/// use serde_json::json;
///
/// let registry = StoreRegistry::new(Config::new("./data")).unwrap();
/// let store = registry.open("sessions.json").unwrap();
///
/// store.create_with_ttl("token", json!({"user": "ada"}), 60).unwrap();
/// assert_eq!(store.get("token").unwrap(), json!({"user": "ada"}));
/// ```
#[derive(Clone)]
pub struct StoreRegistry {
    config: Config,
    clock: Arc<dyn Clock>,
    open_paths: OpenPaths,
}

impl StoreRegistry {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Registry whose stores read time from `clock`.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;
        Ok(Self {
            config,
            clock,
            open_paths: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the store at `file_path`, or at a freshly generated path when
    /// `None`. Relative paths are resolved against the configured data dir.
    ///
    /// Fails with [`LockError::AlreadyLocked`] if the path is held by
    /// another handle in this process or by another process.
    pub fn get_instance(&self, file_path: Option<&Path>) -> Result<Store> {
        let path = match file_path {
            Some(path) => self.resolve(path)?,
            None => self.resolve(Path::new(&unique_file_name()))?,
        };

        log::info!("Acquiring file lock on {:?}", path);

        // Each step below owns its release: an error drops the lease, the
        // directories and the lock taken so far.
        let lease = PathLease::claim(&self.open_paths, path.clone())?;
        let dirs = CreatedDirs::create_parents(&path)?;
        let lock = LockHandle::acquire(&path)?;
        let engine = StorageEngine::open(path, &self.config, self.clock.clone())?;
        dirs.keep();

        Ok(Store {
            inner: Arc::new(StoreInner {
                engine,
                guard: RwLock::new(Some(StoreGuard {
                    lock,
                    _lease: lease,
                })),
            }),
        })
    }

    /// Open the store at `path`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Store> {
        self.get_instance(Some(path.as_ref()))
    }

    /// Open a new, independent store at a generated path.
    pub fn open_fresh(&self) -> Result<Store> {
        self.get_instance(None)
    }

    /// Returns true if a store at `path` is open through this registry.
    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        match self.resolve(path.as_ref()) {
            Ok(path) => lock_set(&self.open_paths).contains(&path),
            Err(_) => false,
        }
    }

    /// Absolute, canonical form of `path` so that aliases of one file
    /// share a registry slot. Touches nothing on disk: directories that do
    /// not exist yet are resolved lexically under their nearest existing
    /// ancestor.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(&self.config.data_dir).join(path)
        };

        let file_name = joined
            .file_name()
            .ok_or_else(|| KeepsakeError::Config(format!("{:?} has no file name", joined)))?
            .to_os_string();
        if has_reserved_suffix(&joined) {
            return Err(KeepsakeError::Config(format!(
                "{:?} ends with a suffix reserved for lock and staging files",
                joined
            )));
        }

        let parent = joined.parent().unwrap_or_else(|| Path::new("/"));
        let existing = parent
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("/"));

        let mut resolved = existing.canonicalize()?;
        for component in parent.strip_prefix(existing).unwrap_or(Path::new("")).components() {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::ParentDir => {
                    resolved.pop();
                }
                _ => {}
            }
        }
        resolved.push(file_name);
        Ok(resolved)
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("config", &self.config)
            .field("open_paths", &*lock_set(&self.open_paths))
            .finish()
    }
}

/// Handle on an open store. Cloning shares the same engine and lock.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    engine: StorageEngine,
    /// `None` once closed.
    guard: RwLock<Option<StoreGuard>>,
}

struct StoreGuard {
    lock: LockHandle,
    _lease: PathLease,
}

impl Store {
    /// Create `key` holding `value`, with no expiry.
    pub fn create(&self, key: &str, value: Document) -> Result<()> {
        self.with_engine(|engine| engine.create(key, value, None))
    }

    /// Create `key` holding `value`, expiring `ttl_seconds` from now.
    pub fn create_with_ttl(&self, key: &str, value: Document, ttl_seconds: u64) -> Result<()> {
        self.with_engine(|engine| engine.create(key, value, Some(ttl_seconds)))
    }

    /// Create `key` from any serializable value. Values that cannot be
    /// represented as a JSON document fail with `ValueNotStructured`.
    pub fn create_from<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let document = serde_json::to_value(value)
            .map_err(|e| ValidationError::ValueNotStructured(e.to_string()))?;
        self.with_engine(|engine| engine.create(key, document, ttl_seconds))
    }

    pub fn get(&self, key: &str) -> Result<Document> {
        self.with_engine(|engine| engine.get(key))
    }

    /// Fetch `key` and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let document = self.get(key)?;
        Ok(serde_json::from_value(document)?)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.with_engine(|engine| engine.delete(key))
    }

    pub fn delete_all(&self) -> Result<()> {
        self.with_engine(|engine| engine.delete_all())
    }

    /// Time left before `key` expires; `None` if it never does.
    pub fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.with_engine(|engine| engine.remaining_ttl(key))
    }

    /// Remove all expired records now instead of waiting for them to be
    /// revisited. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.with_engine(|engine| engine.purge_expired())
    }

    /// Number of live records.
    pub fn len(&self) -> Result<usize> {
        self.with_engine(|engine| Ok(engine.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.with_engine(|engine| Ok(engine.is_empty()))
    }

    /// Returns the path of the backing snapshot file.
    pub fn path(&self) -> &Path {
        self.inner.engine.path()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.inner.engine.metrics()
    }

    pub fn is_closed(&self) -> bool {
        self.read_guard().is_none()
    }

    /// Release the process lock and the registry slot. Every clone of this
    /// handle is closed; later operations fail with [`KeepsakeError::Closed`].
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let taken = self
            .inner
            .guard
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(guard) => {
                log::info!("Closing store at {:?}", self.path());
                // The lease is dropped after the lock is released.
                guard.lock.release()
            }
            None => Ok(()),
        }
    }

    /// Run `op` while holding the lease, so `close` cannot interleave.
    fn with_engine<T>(&self, op: impl FnOnce(&StorageEngine) -> Result<T>) -> Result<T> {
        let guard = self.read_guard();
        if guard.is_none() {
            return Err(KeepsakeError::Closed);
        }
        op(&self.inner.engine)
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Option<StoreGuard>> {
        self.inner
            .guard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Directories created for a new store, removed again on drop unless the
/// open went through.
struct CreatedDirs {
    /// Outermost first.
    dirs: Vec<PathBuf>,
    lock_file: Option<PathBuf>,
    keep: bool,
}

impl CreatedDirs {
    fn create_parents(path: &Path) -> Result<Self> {
        let mut guard = Self {
            dirs: Vec::new(),
            lock_file: None,
            keep: false,
        };
        let Some(parent) = path.parent() else {
            return Ok(guard);
        };

        let mut missing: Vec<&Path> = parent.ancestors().take_while(|p| !p.exists()).collect();
        missing.reverse();
        for dir in missing {
            match std::fs::create_dir(dir) {
                Ok(()) => guard.dirs.push(dir.to_path_buf()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !guard.dirs.is_empty() {
            // Nobody else can have locked inside a directory we just made.
            guard.lock_file = Some(lock_path_for(path));
        }
        Ok(guard)
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for CreatedDirs {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Some(lock_file) = &self.lock_file {
            let _ = std::fs::remove_file(lock_file);
        }
        for dir in self.dirs.iter().rev() {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

/// A claimed slot in the registry's set of open paths, freed on drop.
struct PathLease {
    open_paths: OpenPaths,
    path: PathBuf,
}

impl PathLease {
    fn claim(open_paths: &OpenPaths, path: PathBuf) -> Result<Self> {
        if !lock_set(open_paths).insert(path.clone()) {
            return Err(LockError::AlreadyLocked(path).into());
        }
        Ok(Self {
            open_paths: open_paths.clone(),
            path,
        })
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        lock_set(&self.open_paths).remove(&self.path);
    }
}

fn lock_set(open_paths: &OpenPaths) -> MutexGuard<'_, HashSet<PathBuf>> {
    open_paths.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `KEEPSAKE_<32 hex chars>`, unique per call.
fn unique_file_name() -> String {
    format!("KEEPSAKE_{}", Uuid::new_v4().simple())
}
