// src/fetch/mod.rs

//! Source acquisition
//!
//! A [`SourceFetcher`] materializes upstream source into a directory that is
//! ready for build-system configuration. Fetchers available:
//!
//! - [`GitRepoFetcher`]: clone or update a repository at a refspec
//! - [`DiscoverDownloadVerifyUnpackFetcher`]: find a release archive, download
//!   it, verify its checksum and unpack it
//! - [`LocalDirFetcher`]: copy a local tree (vendored sources)
//!
//! Every fetcher is atomic with respect to its destination: work happens in a
//! sibling staging directory that is renamed into place only on success, so a
//! failed fetch never leaves partial content at `dest`.
//!
//! [`SourceCache`] sits in front of the fetchers and shares fetched trees
//! between pipelines, one lock per cache entry.

mod archive;
mod cache;
mod git;
mod local;

pub use archive::{
    ChecksumSource, DiscoverDownloadVerifyUnpackFetcher, HttpClient, IndexPageDiscovery, Release,
    ReleaseDiscovery, StaticRelease, unpack_archive,
};
pub use cache::SourceCache;
pub use git::GitRepoFetcher;
pub use local::{LocalDirFetcher, copy_tree};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A fetched source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    root: PathBuf,
    /// Resolved revision (commit id, archive checksum, tree digest)
    revision: Option<String>,
}

impl SourceTree {
    pub fn new(root: impl Into<PathBuf>, revision: Option<String>) -> Self {
        Self {
            root: root.into(),
            revision,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// The same revision relocated to another directory
    pub fn relocated(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            revision: self.revision.clone(),
        }
    }
}

/// Capability to acquire upstream source
pub trait SourceFetcher: Send + Sync + fmt::Debug {
    /// Short name of the fetcher family (`git`, `archive`, `dir`)
    fn kind(&self) -> &'static str;

    /// Stable description of what is fetched (location plus ref)
    ///
    /// Two fetchers with equal identities produce identical trees; the
    /// identity feeds cache keys and recipe fingerprints.
    fn identity(&self) -> String;

    /// Whether the identity alone pins the fetched content
    ///
    /// Moving refs (`master`, a "latest release" index) are not pinned: the
    /// same identity can yield different trees over time.
    fn is_pinned(&self) -> bool {
        false
    }

    /// Materialize the source at `dest`
    ///
    /// Re-invoking on an existing destination updates it in place and yields
    /// the same tree when the ref is unchanged.
    fn fetch(&self, dest: &Path, config: &RunConfig) -> Result<SourceTree>;
}

/// Populate a fresh staging directory with `fill`, then move it to `dest`
///
/// The staging directory is a sibling of `dest` so the final rename stays on
/// one filesystem. An existing `dest` is replaced only after `fill` succeeded.
pub(crate) fn stage_then_rename<F>(dest: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = dest.parent().ok_or_else(|| {
        Error::IoError(format!("Destination {} has no parent directory", dest.display()))
    })?;
    fs::create_dir_all(parent)?;

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}.partial-", name))
        .tempdir_in(parent)?;

    fill(staging.path())?;

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::rename(staging.path(), dest)?;
    Ok(())
}

/// Marker written next to a fetched destination recording what it holds
pub(crate) fn stamp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.fetched", name))
}

pub(crate) fn read_stamp(dest: &Path) -> Option<String> {
    if !dest.is_dir() {
        return None;
    }
    fs::read_to_string(stamp_path(dest))
        .ok()
        .map(|s| s.trim().to_string())
}

pub(crate) fn write_stamp(dest: &Path, value: &str) -> Result<()> {
    fs::write(stamp_path(dest), value)?;
    Ok(())
}
