//! KEEPSAKE - Custom Error Types
//! Defines the error hierarchy for the store.

use std::path::PathBuf;

use thiserror::Error;

/// Custom Result type for the Keepsake store.
pub type Result<T> = std::result::Result<T, KeepsakeError>;

/// Error types for the Keepsake store.
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// I/O errors from file operations (snapshot, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The snapshot on disk could not be parsed.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// A write was rejected before touching the store.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A live record already exists under this key.
    #[error("Key '{0}' already present")]
    DuplicateKey(String),

    /// The key is absent or its TTL has elapsed.
    #[error("Key '{0}' not found")]
    NotFound(String),

    /// The backing path is held by another handle or process.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The serialized snapshot would exceed the configured limit.
    #[error("Store full: snapshot of {size} bytes exceeds limit of {limit} bytes")]
    StoreFull { size: usize, limit: usize },

    /// The handle was closed and no longer holds its lock.
    #[error("Store is closed")]
    Closed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons a key, value, or TTL is refused at creation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("key must not be empty")]
    KeyEmpty,

    #[error("key is {len} characters, limit is {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("value serializes to {size} bytes, limit is {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("value is not a structured document: {0}")]
    ValueNotStructured(String),

    #[error("ttl must be a positive number of seconds")]
    TtlNotPositive,
}

/// Failures acquiring the per-path exclusivity lock.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("resource '{}' is already locked", .0.display())]
    AlreadyLocked(PathBuf),
}

impl From<serde_json::Error> for KeepsakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
