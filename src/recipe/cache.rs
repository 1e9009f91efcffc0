// src/recipe/cache.rs

//! Build artifact caching
//!
//! Caches staged install trees keyed by recipe [`Fingerprint`], so a
//! pipeline whose adapter, source, options and patches are unchanged can
//! skip fetch, patch and build entirely and go straight to packaging.
//!
//! Layout under the cache root, sharded on the first two hex digits:
//!
//! ```text
//! <cache_dir>/<ab>/<fingerprint>.tree/   staged install tree
//! <cache_dir>/<ab>/<fingerprint>.json    EntryMeta
//! <cache_dir>/.locks/<fingerprint>.lock
//! ```

use super::Fingerprint;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::fetch::{copy_tree, stage_then_rename};
use crate::hash::{HashAlgorithm, hash_tree};
use crate::lock::KeyedLocks;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Configuration for the build cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for cached trees
    pub cache_dir: PathBuf,
    /// Maximum cache size in bytes (0 = unlimited)
    pub max_size: u64,
    /// Maximum age for cache entries (zero = no expiry)
    pub max_age: Duration,
    /// Re-hash cached trees before handing them out
    pub verify_integrity: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: RunConfig::default().cache_dir,
            max_size: 20 * 1024 * 1024 * 1024,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            verify_integrity: true,
        }
    }
}

impl CacheConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            ..Self::default()
        }
    }
}

/// Metadata stored next to each cached tree
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    fingerprint: String,
    /// Pipeline that produced the entry
    label: String,
    revision: Option<String>,
    created: DateTime<Utc>,
    size: u64,
    file_count: u64,
    tree_digest: String,
}

/// A cached staged install tree
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub tree_path: PathBuf,
    pub label: String,
    pub revision: Option<String>,
    pub created: DateTime<Utc>,
    pub size: u64,
}

/// Build artifact cache
#[derive(Debug, Clone)]
pub struct BuildCache {
    config: CacheConfig,
    locks: KeyedLocks,
}

impl BuildCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        let locks = KeyedLocks::new(config.cache_dir.join(".locks"));
        Ok(Self { config, locks })
    }

    pub fn for_run(config: &RunConfig) -> Result<Self> {
        Self::new(CacheConfig::from_run_config(config))
    }

    pub fn root(&self) -> &Path {
        &self.config.cache_dir
    }

    fn shard_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.config.cache_dir.join(&fp.as_str()[..2])
    }

    fn tree_path(&self, fp: &Fingerprint) -> PathBuf {
        self.shard_dir(fp).join(format!("{}.tree", fp))
    }

    fn metadata_path(&self, fp: &Fingerprint) -> PathBuf {
        self.shard_dir(fp).join(format!("{}.json", fp))
    }

    /// Look up a cached tree
    ///
    /// Expired or corrupted entries are removed and reported as misses.
    pub fn get(&self, fp: &Fingerprint) -> Result<Option<CacheEntry>> {
        let _guard = self.locks.acquire(fp.as_str())?;

        let tree = self.tree_path(fp);
        let Some(meta) = self.read_meta(fp) else {
            debug!("Cache miss: {}", fp.short());
            return Ok(None);
        };
        if !tree.is_dir() {
            debug!("Cache miss: {} (tree missing)", fp.short());
            self.remove_entry(fp);
            return Ok(None);
        }

        if !self.config.max_age.is_zero() {
            let age = Utc::now().signed_duration_since(meta.created);
            if age.to_std().is_ok_and(|age| age > self.config.max_age) {
                debug!("Cache expired: {} (created {})", fp.short(), meta.created);
                self.remove_entry(fp);
                return Ok(None);
            }
        }

        if self.config.verify_integrity {
            let digest = hash_tree(HashAlgorithm::Xxh128, &tree)?;
            if digest.value != meta.tree_digest {
                warn!("Cache corruption detected: {}", fp.short());
                self.remove_entry(fp);
                return Ok(None);
            }
        }

        info!("Cache hit: {} ({} bytes, {})", fp.short(), meta.size, meta.label);
        Ok(Some(CacheEntry {
            fingerprint: fp.clone(),
            tree_path: tree,
            label: meta.label,
            revision: meta.revision,
            created: meta.created,
            size: meta.size,
        }))
    }

    fn read_meta(&self, fp: &Fingerprint) -> Option<EntryMeta> {
        let content = fs::read_to_string(self.metadata_path(fp)).ok()?;
        match serde_json::from_str::<EntryMeta>(&content) {
            Ok(meta) if meta.fingerprint == fp.as_str() => Some(meta),
            Ok(_) | Err(_) => {
                warn!("Ignoring unreadable cache metadata for {}", fp.short());
                None
            }
        }
    }

    /// Store a staged install tree
    pub fn put(
        &self,
        fp: &Fingerprint,
        label: &str,
        revision: Option<&str>,
        staged: &Path,
    ) -> Result<CacheEntry> {
        let _guard = self.locks.acquire(fp.as_str())?;

        let tree = self.tree_path(fp);
        stage_then_rename(&tree, |staging| copy_tree(staged, staging))?;

        let (size, file_count) = tree_size(&tree)?;
        let meta = EntryMeta {
            fingerprint: fp.to_string(),
            label: label.to_string(),
            revision: revision.map(str::to_string),
            created: Utc::now(),
            size,
            file_count,
            tree_digest: hash_tree(HashAlgorithm::Xxh128, &tree)?.value,
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| Error::IoError(format!("Failed to encode cache metadata: {}", e)))?;
        let meta_path = self.metadata_path(fp);
        let tmp = meta_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &meta_path)?;

        info!("Cached: {} as {} ({} bytes)", label, fp.short(), size);
        drop(_guard);

        self.enforce_limits()?;

        Ok(CacheEntry {
            fingerprint: fp.clone(),
            tree_path: tree,
            label: meta.label,
            revision: meta.revision,
            created: meta.created,
            size,
        })
    }

    /// Copy a cached tree to `dest`, replacing whatever is there
    pub fn restore(&self, entry: &CacheEntry, dest: &Path) -> Result<()> {
        let _guard = self.locks.acquire(entry.fingerprint.as_str())?;
        stage_then_rename(dest, |staging| copy_tree(&entry.tree_path, staging))
    }

    fn remove_entry(&self, fp: &Fingerprint) {
        let _ = fs::remove_dir_all(self.tree_path(fp));
        let _ = fs::remove_file(self.metadata_path(fp));
    }

    /// Every entry's metadata, skipping anything unreadable
    fn entries(&self) -> Result<Vec<(Fingerprint, EntryMeta)>> {
        let mut entries = Vec::new();
        for shard in fs::read_dir(&self.config.cache_dir)? {
            let shard = shard?;
            let name = shard.file_name().to_string_lossy().into_owned();
            if name.len() != 2 || !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let path = file?.path();
                if path.extension().is_none_or(|e| e != "json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Ok(fp) = Fingerprint::from_hex(stem)
                    && let Some(meta) = self.read_meta(&fp)
                {
                    entries.push((fp, meta));
                }
            }
        }
        Ok(entries)
    }

    /// Evict oldest entries until the cache fits `max_size`
    fn enforce_limits(&self) -> Result<()> {
        if self.config.max_size == 0 {
            return Ok(());
        }

        let mut entries = self.entries()?;
        let mut total: u64 = entries.iter().map(|(_, m)| m.size).sum();
        if total <= self.config.max_size {
            return Ok(());
        }

        entries.sort_by_key(|(_, meta)| meta.created);
        for (fp, meta) in entries {
            if total <= self.config.max_size {
                break;
            }
            if self.locks.is_held(fp.as_str()) {
                continue;
            }
            debug!("Evicting {} ({} bytes)", fp.short(), meta.size);
            self.remove_entry(&fp);
            total = total.saturating_sub(meta.size);
        }
        Ok(())
    }

    /// Remove every cached tree; returns the number of entries removed
    pub fn clear(&self) -> Result<u64> {
        let mut removed = 0u64;
        for (fp, _) in self.entries()? {
            self.remove_entry(&fp);
            removed += 1;
        }
        for shard in fs::read_dir(&self.config.cache_dir)? {
            let path = shard?.path();
            if path.is_dir() && path.file_name().is_some_and(|n| n.len() == 2) {
                let _ = fs::remove_dir(&path);
            }
        }
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries()?;
        Ok(CacheStats {
            total_size: entries.iter().map(|(_, m)| m.size).sum(),
            entry_count: entries.len() as u64,
            max_size: self.config.max_size,
            oldest: entries.iter().map(|(_, m)| m.created).min(),
            newest: entries.iter().map(|(_, m)| m.created).max(),
        })
    }
}

fn tree_size(root: &Path) -> Result<(u64, u64)> {
    let mut size = 0u64;
    let mut count = 0u64;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        if entry.file_type().is_file() {
            size += entry.metadata().map_err(|e| Error::IoError(e.to_string()))?.len();
            count += 1;
        }
    }
    Ok((size, count))
}

/// Cache statistics
#[derive(Debug)]
pub struct CacheStats {
    pub total_size: u64,
    pub entry_count: u64,
    pub max_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Cache utilization as a percentage
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.total_size as f64 / self.max_size as f64) * 100.0
        }
    }
}
