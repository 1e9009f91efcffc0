// src/target/mod.rs

//! Target distributions
//!
//! A [`TargetDistribution`] turns a staged install tree plus a
//! [`PackagingSpec`] into installable package artifacts. Targets are shared
//! read-only between pipelines, so implementations must be `Send + Sync`
//! and keep no per-call state.
//!
//! [`TarballDistribution`] is the reference target: one compressed tarball
//! per package with a JSON manifest beside it that [`read_manifest`] and
//! [`inspect`] read back.

mod tarball;

pub use tarball::{MANIFEST_SUFFIX, PackageManifest, TarballDistribution, inspect, read_manifest};

use crate::build::ArtifactTree;
use crate::error::Result;
use crate::package::PackagingSpec;
use std::fmt;
use std::path::{Path, PathBuf};

/// One produced package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    /// Published package name
    pub package: String,
    pub version: Option<String>,
    /// Name of the target that produced it
    pub target: String,
    /// The package file
    pub path: PathBuf,
    /// Manifest describing the package
    pub manifest: PathBuf,
    pub file_count: usize,
}

/// Capability to package a build for one distribution
pub trait TargetDistribution: Send + Sync + fmt::Debug {
    /// Stable target name, used for output directories and reports
    fn name(&self) -> &str;

    /// Produce one artifact per package of `spec` under `output_dir`
    ///
    /// Calling this again with the same inputs replaces the previous
    /// artifacts instead of adding new ones.
    fn package(
        &self,
        tree: &ArtifactTree,
        spec: &PackagingSpec,
        output_dir: &Path,
    ) -> Result<Vec<PackageArtifact>>;
}
