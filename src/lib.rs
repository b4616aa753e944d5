//! KEEPSAKE - Single-File Key-Value Store
//!
//! A durable, process-exclusive key-value store that keeps its whole state
//! in one JSON file, with Create/Read/Delete semantics and per-key TTLs.
//!
//! ## Features
//! - **Atomic snapshots**: every mutation rewrites the file via temp + rename
//! - **Process lock**: non-blocking exclusive lock per backing path
//! - **TTL support**: expired keys read as absent and are reclaimed lazily
//! - **Validation**: key length and value size limits checked before writes
//! - **Concurrency**: one engine mutex makes a store safe to share across threads
//! - **Metrics**: lock-free atomic counters for observability
//!
//! Values are immutable once created: there is no update, only delete and
//! create again.
//!
//! ## Example
//! ```no_run
//! use keepsake::{config::Config, store::StoreRegistry};
//! use serde_json::json;
//!
//! let registry = StoreRegistry::new(Config::default()).unwrap();
//! let store = registry.get_instance(None).unwrap();
//!
//! store.create("user:1", json!({"name": "ada"})).unwrap();
//! assert_eq!(store.get("user:1").unwrap(), json!({"name": "ada"}));
//! store.delete("user:1").unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{KeepsakeError, LockError, Result, ValidationError};
pub use store::{Store, StoreRegistry};
