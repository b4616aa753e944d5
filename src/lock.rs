//! KEEPSAKE - Process Lock
//! Exclusive, non-blocking claim on a store's backing path.
//!
//! The lock is taken on a sidecar `<path>.lock` file rather than the
//! snapshot itself: snapshot writes rename a new inode over the path,
//! which would silently drop a lock held on the old one.
//!
//! Two acquisitions through separate file handles conflict even inside one
//! process, so exclusivity is per path, not per process identity.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{LockError, Result};

/// Suffix of the sidecar lock file. Store names may not end with it.
pub const LOCK_SUFFIX: &str = ".lock";

/// A held exclusivity lock. Released by [`LockHandle::release`] or on drop.
#[derive(Debug)]
pub struct LockHandle {
    /// Store path the lock guards.
    path: PathBuf,
    /// Open handle on the sidecar lock file.
    file: File,
    released: bool,
}

impl LockHandle {
    /// Try to lock `path`. Never waits: contention fails immediately with
    /// [`LockError::AlreadyLocked`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if is_contended(&e) {
                log::debug!("lock on {:?} is held elsewhere", path);
                return Err(LockError::AlreadyLocked(path).into());
            }
            return Err(e.into());
        }

        log::info!("File lock acquired on {:?}", path);
        Ok(Self {
            path,
            file,
            released: false,
        })
    }

    /// Returns the store path this lock guards.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now, reporting any failure.
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        FileExt::unlock(&self.file)?;
        log::info!("File lock released on {:?}", self.path);
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            // Closing the file descriptor drops the lock regardless.
            log::warn!("failed to unlock {:?}: {}", self.path, e);
        }
    }
}

/// Sidecar lock file path for a store at `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(LOCK_SUFFIX);
    path.with_file_name(name)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
