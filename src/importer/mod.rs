// src/importer/mod.rs

//! Packaging-description import
//!
//! Some recipes take their subpackage layout from a companion repository
//! instead of spelling it out (the `rpm` recipe reuses the package split of
//! an existing packaging repository). An importer is a pure function from a
//! directory to an [`ImportedDescription`]; the recipe filters the result
//! and feeds it into a [`PackagingSpec`].
//!
//! Importers provided:
//! - [`FileListImporter`]: one `<package>.install` / `<package>.files` list
//!   of patterns per package
//! - [`TomlDescriptionImporter`]: a `packages.toml` with rules and metadata
//!   overrides per package

mod described;
mod filelist;

pub use described::{DESCRIPTION_FILE, TomlDescriptionImporter};
pub(crate) use described::PackageEntry;
pub use filelist::FileListImporter;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::fetch::{SourceCache, SourceFetcher};
use crate::package::{
    FileRules, MetadataOverrides, PackageMetadata, PackageRef, PackagingSpec, SubpackageSpec,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One package found in a packaging description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPackage {
    pub package: PackageRef,
    pub rules: FileRules,
    /// Fields the description sets explicitly
    pub overrides: MetadataOverrides,
}

impl ImportedPackage {
    pub fn new(package: PackageRef, rules: FileRules) -> Self {
        Self {
            package,
            rules,
            overrides: MetadataOverrides::default(),
        }
    }

    pub fn into_subpackage(self) -> SubpackageSpec {
        SubpackageSpec::new(self.package, self.rules).with_overrides(self.overrides)
    }
}

/// Ordered packages parsed from one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedDescription {
    pub pkgs: Vec<ImportedPackage>,
}

impl ImportedDescription {
    pub fn len(&self) -> usize {
        self.pkgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkgs.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pkgs.iter().map(|p| p.package.name()).collect()
    }

    /// Keep the packages for which `keep` returns true, preserving order
    pub fn filter<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&ImportedPackage) -> bool,
    {
        self.pkgs.retain(|p| keep(p));
        self
    }

    /// Drop every package whose group is listed
    pub fn without_groups(self, groups: &[&str]) -> Self {
        self.filter(|p| p.package.group().is_none_or(|g| !groups.contains(&g)))
    }

    /// Combine with the recipe's own metadata
    ///
    /// Fields set by the description override the recipe's defaults for that
    /// subpackage only; everything else is inherited from `metadata`.
    pub fn into_packaging_spec(self, metadata: PackageMetadata) -> Result<PackagingSpec> {
        if self.pkgs.is_empty() {
            return Err(Error::Packaging {
                target: metadata.package.to_string(),
                reason: "imported packaging description contains no packages".to_string(),
            });
        }
        PackagingSpec::new(
            metadata,
            self.pkgs.into_iter().map(ImportedPackage::into_subpackage).collect(),
        )
    }
}

/// Capability to read a packaging description from a directory
pub trait PackagingDescriptionImporter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn parse(&self, directory: &Path) -> Result<ImportedDescription>;
}

/// Look up a built-in importer by name
pub fn importer_for(name: &str) -> Result<Arc<dyn PackagingDescriptionImporter>> {
    match name {
        "file-list" => Ok(Arc::new(FileListImporter::new())),
        "toml" => Ok(Arc::new(TomlDescriptionImporter::new())),
        other => Err(Error::ConfigError(format!(
            "Unknown packaging description format '{}' (expected file-list or toml)",
            other
        ))),
    }
}

/// Fetch a companion repository through the shared cache and parse it
///
/// `subdir` selects the description directory inside the fetched tree
/// (`debian` for a Debian packaging repository).
pub fn import_from(
    fetcher: &dyn SourceFetcher,
    subdir: Option<&Path>,
    importer: &dyn PackagingDescriptionImporter,
    config: &RunConfig,
) -> Result<ImportedDescription> {
    let cache = SourceCache::new(config);
    let tree = cache.warm(fetcher, config)?;
    let dir = match subdir {
        Some(sub) => tree.root().join(sub),
        None => tree.root().to_path_buf(),
    };
    if !dir.is_dir() {
        return Err(Error::NotFound(format!(
            "Packaging description directory {} in {}",
            subdir.map(|s| s.display().to_string()).unwrap_or_default(),
            fetcher.identity()
        )));
    }

    debug!("Importing {} description from {}", importer.name(), dir.display());
    let description = importer.parse(&dir)?;
    info!(
        "Imported {} package(s) from {}: {}",
        description.len(),
        fetcher.identity(),
        description.names().join(", ")
    );
    Ok(description)
}
