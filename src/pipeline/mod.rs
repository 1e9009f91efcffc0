// src/pipeline/mod.rs

//! Build pipelines
//!
//! A [`BuildPipeline`] binds one [`BuildRecipe`] to an ordered list of
//! (target distribution, packaging spec) pairs. The recipe is built once;
//! its staged install tree is then packaged once per target.
//! [`PipelineExecutor`] drives a pipeline through its states and returns a
//! [`PipelineReport`].

mod executor;
mod report;
mod state;

pub use executor::PipelineExecutor;
pub use report::{PipelineReport, TargetReport};
pub use state::{PipelineState, Stage};

use crate::error::{Error, Result};
use crate::package::{PackageMetadata, PackagingSpec};
use crate::recipe::BuildRecipe;
use crate::target::TargetDistribution;
use std::collections::HashSet;
use std::sync::Arc;

/// What a target packages: plain metadata (one package) or a full spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagingInput {
    Metadata(PackageMetadata),
    Spec(PackagingSpec),
}

impl PackagingInput {
    pub fn into_spec(self) -> PackagingSpec {
        match self {
            PackagingInput::Metadata(metadata) => PackagingSpec::single(metadata),
            PackagingInput::Spec(spec) => spec,
        }
    }
}

impl From<PackageMetadata> for PackagingInput {
    fn from(metadata: PackageMetadata) -> Self {
        PackagingInput::Metadata(metadata)
    }
}

impl From<PackagingSpec> for PackagingInput {
    fn from(spec: PackagingSpec) -> Self {
        PackagingInput::Spec(spec)
    }
}

/// One packaging target of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineTarget {
    pub distribution: Arc<dyn TargetDistribution>,
    pub packaging: PackagingSpec,
}

/// A recipe bound to its packaging targets
#[derive(Debug, Clone)]
pub struct BuildPipeline {
    name: String,
    recipe: BuildRecipe,
    targets: Vec<PipelineTarget>,
}

impl BuildPipeline {
    pub fn new(name: impl Into<String>, recipe: BuildRecipe) -> Self {
        Self {
            name: name.into(),
            recipe,
            targets: Vec::new(),
        }
    }

    /// Add a target; the order of calls is the packaging order
    pub fn target(
        mut self,
        distribution: Arc<dyn TargetDistribution>,
        packaging: impl Into<PackagingInput>,
    ) -> Self {
        self.targets.push(PipelineTarget {
            distribution,
            packaging: packaging.into().into_spec(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recipe(&self) -> &BuildRecipe {
        &self.recipe
    }

    pub fn targets(&self) -> &[PipelineTarget] {
        &self.targets
    }

    /// Check the pipeline before anything runs
    ///
    /// The name doubles as a directory and lock key, so it is restricted to
    /// `[A-Za-z0-9._-]`. Target names must be distinct, and within a target
    /// every produced package name must be unique.
    pub fn validate(&self) -> Result<()> {
        let name_ok = !self.name.is_empty()
            && !self.name.starts_with('.')
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !name_ok {
            return Err(Error::ConfigError(format!(
                "Invalid pipeline name '{}'",
                self.name
            )));
        }
        if self.targets.is_empty() {
            return Err(Error::ConfigError(format!(
                "Pipeline {} has no packaging targets",
                self.name
            )));
        }

        let mut target_names = HashSet::new();
        for target in &self.targets {
            let target_name = target.distribution.name();
            if !target_names.insert(target_name) {
                return Err(Error::ConfigError(format!(
                    "Pipeline {} lists target {} twice",
                    self.name, target_name
                )));
            }
            target.packaging.validate()?;

            let mut packages = HashSet::new();
            for package in target.packaging.packages() {
                let package_name = package.package_name();
                if !packages.insert(package_name.clone()) {
                    return Err(Error::ConfigError(format!(
                        "Pipeline {} produces package {} twice for {}",
                        self.name, package_name, target_name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Meson;
    use crate::fetch::LocalDirFetcher;
    use crate::package::{FileRules, PackageRef, SubpackageSpec};
    use crate::target::TarballDistribution;
    use crate::version::LooseVersion;

    fn recipe() -> BuildRecipe {
        BuildRecipe::builder(Arc::new(Meson), Arc::new(LocalDirFetcher::new("/src/zchunk")))
            .build()
            .unwrap()
    }

    fn metadata(name: &str) -> PackageMetadata {
        PackageMetadata::new(PackageRef::new(name).unwrap(), "zchunk library").unwrap()
    }

    #[test]
    fn test_metadata_becomes_single_spec() {
        let pipeline = BuildPipeline::new("zchunk", recipe())
            .target(Arc::new(TarballDistribution::new("debian")), metadata("zchunk"));
        assert_eq!(pipeline.targets().len(), 1);
        assert!(pipeline.targets()[0].packaging.subpackages.is_empty());
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_targets_and_good_name() {
        assert!(BuildPipeline::new("zchunk", recipe()).validate().is_err());

        let bad = BuildPipeline::new("zchunk/../x", recipe())
            .target(Arc::new(TarballDistribution::new("debian")), metadata("zchunk"));
        assert!(matches!(bad.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_targets() {
        let target = Arc::new(TarballDistribution::new("debian"));
        let pipeline = BuildPipeline::new("zchunk", recipe())
            .target(target.clone(), metadata("zchunk"))
            .target(target, metadata("zchunk"));
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_family_names() {
        let version = LooseVersion::parse("1.8.16").unwrap();
        let base = PackageMetadata::new(
            PackageRef::new("modulemd").unwrap().with_incompatible_digits(1),
            "Module metadata",
        )
        .unwrap()
        .with_version(version);
        let spec = PackagingSpec::new(
            base,
            vec![
                SubpackageSpec::new(
                    PackageRef::new("modulemd").unwrap().with_incompatible_digits(1),
                    FileRules::include(["usr/lib/**"]),
                ),
                SubpackageSpec::new(
                    PackageRef::new("modulemd1").unwrap(),
                    FileRules::include(["usr/bin/**"]),
                ),
            ],
        )
        .unwrap();
        let pipeline = BuildPipeline::new("modulemd", recipe())
            .target(Arc::new(TarballDistribution::new("debian")), spec);
        assert!(pipeline.validate().is_err());
    }
}
