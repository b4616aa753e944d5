//! KEEPSAKE - Store Configuration
//! Defines tunable limits and paths for the store.

use std::path::PathBuf;

use crate::error::{KeepsakeError, Result};

/// Longest accepted key, in characters.
pub const MAX_KEY_LEN: usize = 32;

/// Largest accepted value, in serialized bytes.
pub const MAX_VALUE_SIZE: usize = 16 * 1024;

/// Largest accepted snapshot file, in bytes.
pub const MAX_STORE_SIZE: usize = 1024 * 1024 * 1024;

/// Configuration for a Keepsake store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that relative and generated file names are resolved against.
    pub data_dir: PathBuf,

    /// Maximum key length in characters.
    pub max_key_len: usize,

    /// Maximum serialized value size in bytes.
    pub max_value_size: usize,

    /// Maximum serialized snapshot size in bytes.
    pub max_store_size: usize,

    /// Whether to fsync the staged snapshot and its directory on every write.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_key_len: MAX_KEY_LEN,
            max_value_size: MAX_VALUE_SIZE,
            max_store_size: MAX_STORE_SIZE,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    pub fn with_max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    pub fn with_max_store_size(mut self, size: usize) -> Self {
        self.max_store_size = size;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Reject limits that would make every write fail.
    pub fn validate(&self) -> Result<()> {
        if self.max_key_len == 0 {
            return Err(KeepsakeError::Config("max_key_len must be positive".into()));
        }
        if self.max_value_size == 0 {
            return Err(KeepsakeError::Config(
                "max_value_size must be positive".into(),
            ));
        }
        if self.max_store_size < self.max_value_size {
            return Err(KeepsakeError::Config(format!(
                "max_store_size ({}) is smaller than max_value_size ({})",
                self.max_store_size, self.max_value_size
            )));
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
