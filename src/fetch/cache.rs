// src/fetch/cache.rs

//! Shared source cache
//!
//! Fetched trees live under `downloads_tmp/sources/<key>`, where the key is
//! derived from the fetcher identity. Pipelines never build inside the cache:
//! they hold the entry lock while the fetcher refreshes the cached tree and
//! while it is copied into their own working directory, then release it.
//! Two pipelines asking for the same upstream ref therefore serialize on
//! that entry, and each ends up with a private, complete copy.

use super::{SourceFetcher, SourceTree, copy_tree, stage_then_rename};
use crate::config::RunConfig;
use crate::error::Result;
use crate::hash::{HashAlgorithm, hash_bytes};
use crate::lock::KeyedLocks;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Keyed, locked store of fetched source trees
#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
    locks: KeyedLocks,
}

impl SourceCache {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            root: config.source_cache_dir(),
            locks: KeyedLocks::new(config.lock_dir().join("sources")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache key for a fetcher: `<kind>-<digest of identity>`
    pub fn key_for(fetcher: &dyn SourceFetcher) -> String {
        let digest = hash_bytes(HashAlgorithm::Xxh128, fetcher.identity().as_bytes());
        format!("{}-{}", fetcher.kind(), digest.value)
    }

    pub fn entry_path(&self, fetcher: &dyn SourceFetcher) -> PathBuf {
        self.root.join(Self::key_for(fetcher))
    }

    /// Fetch (or refresh) the cached tree without copying it anywhere
    pub fn warm(&self, fetcher: &dyn SourceFetcher, config: &RunConfig) -> Result<SourceTree> {
        let key = Self::key_for(fetcher);
        let _guard = self.locks.acquire(&key)?;
        let entry = self.root.join(&key);
        info!("Fetching {} into cache entry {}", fetcher.identity(), key);
        fetcher.fetch(&entry, config)
    }

    /// Fetch through the cache and place a private copy at `dest`
    pub fn checkout(
        &self,
        fetcher: &dyn SourceFetcher,
        dest: &Path,
        config: &RunConfig,
    ) -> Result<SourceTree> {
        let key = Self::key_for(fetcher);
        let _guard = self.locks.acquire(&key)?;
        let entry = self.root.join(&key);

        debug!("Refreshing cache entry {} for {}", key, fetcher.identity());
        let cached = fetcher.fetch(&entry, config)?;

        config.cancel.check("fetch")?;
        stage_then_rename(dest, |staging| copy_tree(cached.root(), staging))?;
        debug!("Copied {} to {}", cached.root().display(), dest.display());
        Ok(cached.relocated(dest))
    }
}
