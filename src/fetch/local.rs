// src/fetch/local.rs

//! Local directory fetcher and tree copying

use super::{SourceFetcher, SourceTree, stage_then_rename};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, hash_tree};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Copies a directory that already exists on disk
///
/// The identity includes a digest of the tree, so editing a vendored source
/// invalidates cached builds of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDirFetcher {
    path: PathBuf,
}

impl LocalDirFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceFetcher for LocalDirFetcher {
    fn kind(&self) -> &'static str {
        "dir"
    }

    fn identity(&self) -> String {
        match hash_tree(HashAlgorithm::Xxh128, &self.path) {
            Ok(digest) => format!("dir+{}#{}", self.path.display(), digest.value),
            Err(e) => format!("dir+{}#unreadable:{}", self.path.display(), e),
        }
    }

    fn is_pinned(&self) -> bool {
        true
    }

    fn fetch(&self, dest: &Path, config: &RunConfig) -> Result<SourceTree> {
        config.cancel.check("fetch")?;
        if !self.path.is_dir() {
            return Err(Error::Fetch {
                source_ref: self.path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        info!("Copying {} to {}", self.path.display(), dest.display());
        stage_then_rename(dest, |staging| copy_tree(&self.path, staging))?;

        let digest = hash_tree(HashAlgorithm::Xxh128, dest)?;
        Ok(SourceTree::new(dest, Some(digest.to_prefixed_string())))
    }
}

/// Recursively copy `src` into the existing directory `dst`
///
/// Symlinks are recreated rather than followed; permissions are preserved.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry =
            entry.map_err(|e| Error::IoError(format!("Walking {}: {}", src.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
