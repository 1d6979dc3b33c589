//! Single-writer lock for on-disk engine stores.
//!
//! DuckDB admits one writing process per database file. Before a store is
//! opened, the process takes an exclusive `fs2` lock on `<store>.lock` and
//! records its identity in that file, so a second process can report who
//! holds the store instead of failing with an opaque engine error.

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} is in use{}", .path.display(), held_by(.holder))]
    Locked {
        path: PathBuf,
        holder: Option<LockHolder>,
    },

    #[error("Cannot lock {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn held_by(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(h) => format!(" by {}", h),
        None => String::new(),
    }
}

/// Who holds a store, as written into its lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: String,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} (since {})", self.pid, self.acquired_at)
    }
}

/// Exclusive hold on one store. Released on drop.
pub struct StoreLock {
    file: File,
    lock_path: PathBuf,
}

impl StoreLock {
    /// Take the lock for `store` without blocking.
    pub fn acquire(store: &Path) -> Result<Self, LockError> {
        let lock_path = lock_path_for(store);
        let io_err = |source| LockError::Io {
            path: lock_path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err)?;

        // Fully qualified: std's File::try_lock_exclusive (1.89+) has a different error type.
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(LockError::Locked {
                    path: store.to_path_buf(),
                    holder: read_holder(&lock_path),
                });
            }
            return Err(io_err(e));
        }

        let holder = LockHolder {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        };
        file.set_len(0).map_err(io_err)?;
        serde_json::to_writer(&file, &holder)
            .map_err(|e| io_err(io::Error::new(io::ErrorKind::Other, e)))?;
        debug!(lock = %lock_path.display(), pid = holder.pid, "store lock acquired");

        Ok(Self { file, lock_path })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Clear the holder record; the OS lock goes with the handle.
        if let Err(e) = self.file.set_len(0) {
            debug!("Failed to clear {}: {}", self.lock_path.display(), e);
        }
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

/// Holder recorded in a lock file, if it can be read.
pub fn read_holder(lock_path: &Path) -> Option<LockHolder> {
    let bytes = fs::read(lock_path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `cache.duckdb` → `cache.duckdb.lock`, `cache` → `cache.lock`.
pub fn lock_path_for(store: &Path) -> PathBuf {
    let mut name = store.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    store.with_file_name(name)
}
