// src/lib.rs

//! Forgeline build-pipeline engine
//!
//! Takes upstream projects from source to distribution packages:
//! fetch a source tree, apply patch sets, configure/build/install it with
//! its build system, then split the staged tree into packages for one or
//! more target distributions.
//!
//! # Architecture
//!
//! - Recipes: a [`BuildRecipe`] names one fetcher, patch sets, a build
//!   system adapter and its options; its fingerprint keys the build cache
//! - Pipelines: a [`BuildPipeline`] builds a recipe once and packages the
//!   result for every target; [`PipelineExecutor`] drives it through
//!   `Pending -> Fetched -> Patched -> Built -> Packaged -> Succeeded`
//! - Catalogues: a [`Catalogue`] of named, interdependent recipe units,
//!   run wave by wave in parallel by [`RepoPipelineRunner`]
//! - Shared state: the source and build caches are locked per entry; each
//!   pipeline owns its working directory

pub mod build;
pub mod cancel;
pub mod catalogue;
pub mod config;
mod error;
pub mod fetch;
pub mod hash;
pub mod importer;
pub mod lock;
pub mod package;
pub mod patch;
pub mod pipeline;
pub mod process;
pub mod recipe;
pub mod runner;
pub mod target;
pub mod version;

pub use build::{AutoTools, BuildOptions, BuildSystemAdapter, CMake, Meson, OptionValue};
pub use cancel::CancelToken;
pub use catalogue::{Catalogue, RecipeUnit};
pub use config::RunConfig;
pub use error::{Error, Result};
pub use fetch::{
    DiscoverDownloadVerifyUnpackFetcher, GitRepoFetcher, LocalDirFetcher, SourceFetcher,
    SourceTree,
};
pub use hash::{Checksum, HashAlgorithm};
pub use importer::{ImportedDescription, PackagingDescriptionImporter};
pub use package::{
    FileRules, PackageMetadata, PackageRef, PackagingSpec, SubpackageSpec, VersionedPackageRef,
};
pub use patch::{PatchApplier, PatchSet};
pub use pipeline::{BuildPipeline, PipelineExecutor, PipelineReport, PipelineState, Stage};
pub use recipe::{BuildCache, BuildRecipe, Fingerprint, RecipeGraph};
pub use runner::{RepoPipelineRunner, RunReport};
pub use target::{PackageArtifact, TarballDistribution, TargetDistribution};
pub use version::LooseVersion;
