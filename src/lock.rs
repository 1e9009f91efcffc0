// src/lock.rs

//! Per-entry locks for the shared caches
//!
//! Pipelines running in parallel share the source cache and the build cache.
//! Every cache entry is guarded by its own lock so two pipelines fetching the
//! same upstream ref serialize on that entry while unrelated entries proceed.
//!
//! # Lock Strategy
//!
//! - **In-process**: a set of held keys plus a condvar, so worker threads of
//!   one runner wait without touching the filesystem
//! - **Cross-process**: `flock(LOCK_EX)` on `<lock_dir>/<key>.lock`, so two
//!   invocations sharing a cache directory do not corrupt each other
//!
//! Both are released when the [`EntryLock`] guard is dropped.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct Held {
    keys: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Registry of per-key locks rooted in one lock directory
#[derive(Debug, Clone)]
pub struct KeyedLocks {
    dir: PathBuf,
    held: Arc<Held>,
}

impl KeyedLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: Arc::new(Held::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire the lock for `key`, blocking until it is available
    pub fn acquire(&self, key: &str) -> Result<EntryLock> {
        validate_key(key)?;

        {
            let mut keys = self
                .held
                .keys
                .lock()
                .map_err(|_| Error::IoError("Lock registry poisoned".to_string()))?;
            while keys.contains(key) {
                debug!("Waiting for cache entry lock {}", key);
                keys = self
                    .held
                    .released
                    .wait(keys)
                    .map_err(|_| Error::IoError("Lock registry poisoned".to_string()))?;
            }
            keys.insert(key.to_string());
        }

        match self.lock_file(key) {
            Ok(file) => Ok(EntryLock {
                key: key.to_string(),
                file: Some(file),
                held: Arc::clone(&self.held),
            }),
            Err(e) => {
                self.release(key);
                Err(e)
            }
        }
    }

    /// Whether `key` is currently held by this process
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    fn lock_file(&self, key: &str) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.lock", key));
        let file = File::create(&path)?;
        file.lock_exclusive().map_err(|e| {
            Error::IoError(format!("Failed to lock {}: {}", path.display(), e))
        })?;
        Ok(file)
    }

    fn release(&self, key: &str) {
        release(&self.held, key);
    }
}

fn release(held: &Held, key: &str) {
    if let Ok(mut keys) = held.keys.lock() {
        keys.remove(key);
    }
    held.released.notify_all();
}

/// Cache keys become file names; keep them to a safe alphabet
fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::ParseError(format!("Invalid cache key '{}'", key)))
    }
}

/// Guard for one locked cache entry
#[derive(Debug)]
pub struct EntryLock {
    key: String,
    file: Option<File>,
    held: Arc<Held>,
}

impl EntryLock {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        release(&self.held, &self.key);
    }
}
