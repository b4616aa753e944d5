//! KEEPSAKE - Snapshot File
//! Persists the full record map as one JSON document, replaced atomically
//! on every mutation.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{KeepsakeError, Result};
use crate::types::{Key, Record};

/// The record map as stored on disk.
pub type RecordMap = BTreeMap<Key, Record>;

/// Suffix of staging files. Store names may not end with it.
pub const STAGING_SUFFIX: &str = ".tmp";

/// Full-state snapshot of a store at one path.
///
/// ## File Format
/// ```text
/// {"<key>": {"value": <document>, "created_at": <ms>, "ttl_seconds": <int|null>}, ...}
/// ```
/// Each write is staged in a uniquely named `.<name>.<random>.tmp` file in
/// the same directory and renamed over `<path>`, so a crash mid-write
/// leaves the previous snapshot readable.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    /// Path to the snapshot on disk.
    path: PathBuf,
    /// fsync the staged file and the directory entry.
    sync_writes: bool,
}

impl SnapshotFile {
    pub fn new(path: PathBuf, sync_writes: bool) -> Self {
        Self { path, sync_writes }
    }

    /// Returns the path to the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing, empty or whitespace-only file is an
    /// empty store; anything else that fails to parse is corruption.
    pub fn load(&self) -> Result<RecordMap> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => return Err(e.into()),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(RecordMap::new());
        }

        serde_json::from_slice(&raw).map_err(|e| {
            KeepsakeError::Corruption(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Returns true if a snapshot exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize the record map into the on-disk encoding.
    pub fn encode(records: &RecordMap) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(records)?)
    }

    /// Stage `bytes` in a fresh temp file, then rename it into place.
    /// On failure the staging file is removed and the previous snapshot
    /// is untouched.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let dir = parent_dir(&self.path);
        let mut prefix = std::ffi::OsString::from(".");
        prefix.push(self.path.file_name().unwrap_or_default());
        prefix.push(".");

        let mut staged = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)?;
        staged.write_all(bytes)?;
        if self.sync_writes {
            staged.as_file().sync_all()?; // fsync before the rename makes it visible
        }

        staged.persist(&self.path).map_err(|e| e.error)?;

        if self.sync_writes {
            sync_dir(dir)?;
        }
        Ok(())
    }
}

/// True if `path` names a file the store keeps beside its snapshots,
/// so it cannot itself be a snapshot.
pub(crate) fn has_reserved_suffix(path: &Path) -> bool {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.ends_with(STAGING_SUFFIX) || name.ends_with(crate::lock::LOCK_SUFFIX)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
