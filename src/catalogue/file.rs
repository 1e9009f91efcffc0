// src/catalogue/file.rs

//! TOML catalogue format
//!
//! ```toml
//! [[target]]
//! name = "debian"
//!
//! [[recipe]]
//! name = "comps"
//! adapter = "cmake"
//! subdir = "libcomps"
//! patches = ["patches/libcomps"]
//! options = { PYTHON_DESIRED = 3, ENABLE_TESTS = false }
//!
//! [recipe.source]
//! git = "https://github.com/rpm-software-management/libcomps"
//! ref = "master"
//!
//! [recipe.package]
//! description_short = "Libcomps is a pure C alternative for yum.comps library."
//! section = "devel"
//! ```
//!
//! Sources take exactly one of `git` (+ `ref`), `archive` (+ `checksum`),
//! `index` (+ `pattern`) or `dir`. Subpackages are `[[recipe.subpackage]]`
//! tables, or come from `[recipe.import]`, which fetches a companion
//! repository and parses its packaging description. `[recipe.per_target.<name>]`
//! refines the package metadata for one target.
//!
//! Relative paths (patch sets, `dir` sources) resolve against the
//! directory holding the catalogue file.

use super::{Catalogue, RecipeUnit};
use crate::build::{BuildOptions, SandboxPolicy, adapter_for};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::fetch::{
    DiscoverDownloadVerifyUnpackFetcher, GitRepoFetcher, IndexPageDiscovery, LocalDirFetcher,
    SourceFetcher, StaticRelease,
};
use crate::hash::Checksum;
use crate::importer::{PackageEntry, import_from, importer_for};
use crate::package::{MetadataOverrides, PackageMetadata, PackageRef, PackagingSpec};
use crate::patch::PatchSet;
use crate::pipeline::BuildPipeline;
use crate::recipe::BuildRecipe;
use crate::target::{TarballDistribution, TargetDistribution};
use crate::version::LooseVersion;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A parsed catalogue file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogueFile {
    #[serde(skip)]
    base_dir: PathBuf,
    #[serde(default, rename = "target")]
    targets: Vec<TargetDecl>,
    #[serde(default, rename = "recipe")]
    recipes: Vec<RecipeDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetDecl {
    name: String,
    #[serde(default = "default_format")]
    format: String,
    /// Warn about unclaimed files instead of failing
    #[serde(default)]
    lenient: bool,
    compression: Option<u32>,
}

fn default_format() -> String {
    "tarball".to_string()
}

impl TargetDecl {
    fn distribution(&self) -> Result<Arc<dyn TargetDistribution>> {
        match self.format.as_str() {
            "tarball" => {
                let mut target = TarballDistribution::new(&self.name);
                if let Some(level) = self.compression {
                    target = target.with_compression(level);
                }
                if self.lenient {
                    target = target.lenient();
                }
                Ok(Arc::new(target))
            }
            other => Err(Error::ConfigError(format!(
                "Target {}: unknown format '{}'",
                self.name, other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDecl {
    git: Option<String>,
    #[serde(rename = "ref")]
    refspec: Option<String>,
    archive: Option<String>,
    checksum: Option<String>,
    version: Option<String>,
    index: Option<String>,
    pattern: Option<String>,
    checksum_suffix: Option<String>,
    dir: Option<PathBuf>,
}

impl SourceDecl {
    fn fetcher(&self, base_dir: &Path) -> Result<Arc<dyn SourceFetcher>> {
        let kinds = [
            self.git.is_some(),
            self.archive.is_some(),
            self.index.is_some(),
            self.dir.is_some(),
        ];
        if kinds.iter().filter(|k| **k).count() != 1 {
            return Err(Error::ConfigError(
                "source needs exactly one of git, archive, index or dir".to_string(),
            ));
        }
        if self.refspec.is_some() && self.git.is_none() {
            return Err(Error::ConfigError("source ref only applies to git".to_string()));
        }

        if let Some(uri) = &self.git {
            let mut fetcher = GitRepoFetcher::new(uri);
            if let Some(refspec) = &self.refspec {
                fetcher = fetcher.with_refspec(refspec);
            }
            return Ok(Arc::new(fetcher));
        }
        if let Some(url) = &self.archive {
            let checksum = self.checksum.as_deref().ok_or_else(|| {
                Error::ConfigError(format!("archive source {} needs a checksum", url))
            })?;
            let mut release = StaticRelease::new(url, Checksum::parse(checksum)?);
            if let Some(version) = &self.version {
                release = release.with_version(LooseVersion::parse(version)?);
            }
            return Ok(Arc::new(DiscoverDownloadVerifyUnpackFetcher::new(release)));
        }
        if let Some(index) = &self.index {
            let pattern = self.pattern.as_deref().ok_or_else(|| {
                Error::ConfigError(format!("index source {} needs a pattern", index))
            })?;
            let mut discovery = IndexPageDiscovery::new(index, pattern)?;
            if let Some(suffix) = &self.checksum_suffix {
                discovery = discovery.with_checksum_suffix(suffix);
            }
            return Ok(Arc::new(DiscoverDownloadVerifyUnpackFetcher::new(discovery)));
        }
        let dir = self.dir.as_deref().unwrap_or(Path::new("."));
        Ok(Arc::new(LocalDirFetcher::new(base_dir.join(dir))))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PatchDecl {
    Path(PathBuf),
    Table { path: PathBuf, strip: Option<usize> },
}

impl PatchDecl {
    fn patch_set(&self, base_dir: &Path) -> PatchSet {
        match self {
            PatchDecl::Path(path) => PatchSet::new(base_dir.join(path)),
            PatchDecl::Table { path, strip } => {
                let set = PatchSet::new(base_dir.join(path));
                match strip {
                    Some(strip) => set.with_strip(*strip),
                    None => set,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageDecl {
    /// Defaults to the recipe name
    name: Option<String>,
    group: Option<String>,
    #[serde(default)]
    incompatible_digits: usize,
    version: Option<String>,
    description_short: String,
    description_long: Option<String>,
    section: Option<String>,
    homepage: Option<String>,
    license: Option<String>,
    #[serde(default)]
    provides: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportDecl {
    source: SourceDecl,
    subdir: Option<PathBuf>,
    #[serde(default = "default_import_format")]
    format: String,
    #[serde(default)]
    exclude_groups: Vec<String>,
}

fn default_import_format() -> String {
    "file-list".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeDecl {
    name: String,
    adapter: String,
    #[serde(default)]
    depends: Vec<String>,
    source: SourceDecl,
    #[serde(default)]
    patches: Vec<PatchDecl>,
    #[serde(default)]
    options: BuildOptions,
    subdir: Option<PathBuf>,
    sandbox: Option<SandboxPolicy>,
    package: PackageDecl,
    #[serde(default, rename = "subpackage")]
    subpackages: Vec<PackageEntry>,
    import: Option<ImportDecl>,
    /// Target names; all declared targets when empty
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    per_target: BTreeMap<String, MetadataOverrides>,
}

impl CatalogueFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read catalogue {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::parse(&content, base_dir)
    }

    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let mut file: CatalogueFile = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid catalogue: {}", e)))?;
        file.base_dir = base_dir.to_path_buf();
        Ok(file)
    }

    pub fn recipe_names(&self) -> Vec<&str> {
        self.recipes.iter().map(|r| r.name.as_str()).collect()
    }

    /// Validate every entry and build the catalogue
    pub fn into_catalogue(self) -> Result<Catalogue> {
        if self.targets.is_empty() {
            return Err(Error::ConfigError("Catalogue declares no targets".to_string()));
        }
        let mut targets: Vec<(String, Arc<dyn TargetDistribution>)> = Vec::new();
        let mut by_name: HashMap<String, Arc<dyn TargetDistribution>> = HashMap::new();
        for decl in &self.targets {
            let distribution = decl.distribution()?;
            if by_name.insert(decl.name.clone(), distribution.clone()).is_some() {
                return Err(Error::ConfigError(format!("Target {} is declared twice", decl.name)));
            }
            targets.push((decl.name.clone(), distribution));
        }

        let mut catalogue = Catalogue::new();
        for decl in self.recipes {
            let chosen = if decl.targets.is_empty() {
                targets.iter().map(|(_, t)| t.clone()).collect()
            } else {
                decl.targets
                    .iter()
                    .map(|name| {
                        by_name.get(name).cloned().ok_or_else(|| {
                            Error::ConfigError(format!(
                                "Recipe {} uses undeclared target {}",
                                decl.name, name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            let entry = RecipeEntry {
                decl,
                base_dir: self.base_dir.clone(),
                targets: chosen,
            };
            entry.validate()?;
            catalogue.add(Arc::new(entry))?;
        }
        catalogue.graph()?;
        Ok(catalogue)
    }
}

/// A recipe declared in a catalogue file
#[derive(Debug)]
pub struct RecipeEntry {
    decl: RecipeDecl,
    base_dir: PathBuf,
    targets: Vec<Arc<dyn TargetDistribution>>,
}

impl RecipeEntry {
    /// Check everything that needs no filesystem or network access
    fn validate(&self) -> Result<()> {
        let name = &self.decl.name;
        let context = |e: Error| Error::ConfigError(format!("Recipe {}: {}", name, e));

        adapter_for(&self.decl.adapter).map_err(context)?;
        self.decl.source.fetcher(&self.base_dir).map_err(context)?;
        self.metadata().map_err(context)?;
        for overrides in self.decl.per_target.values() {
            self.metadata()?.overlay(overrides).validate().map_err(context)?;
        }
        for target in self.decl.per_target.keys() {
            if !self.targets.iter().any(|t| t.name() == target) {
                return Err(Error::ConfigError(format!(
                    "Recipe {}: per_target names unknown target {}",
                    name, target
                )));
            }
        }
        if let Some(import) = &self.decl.import {
            if !self.decl.subpackages.is_empty() {
                return Err(Error::ConfigError(format!(
                    "Recipe {}: subpackages and import are mutually exclusive",
                    name
                )));
            }
            importer_for(&import.format).map_err(context)?;
            import.source.fetcher(&self.base_dir).map_err(context)?;
        }
        for entry in &self.decl.subpackages {
            entry.clone().into_imported().map_err(context)?;
        }
        Ok(())
    }

    fn recipe(&self) -> Result<BuildRecipe> {
        let adapter = adapter_for(&self.decl.adapter)?;
        let fetcher = self.decl.source.fetcher(&self.base_dir)?;
        let mut builder = BuildRecipe::builder(adapter, fetcher)
            .patches(self.decl.patches.iter().map(|p| p.patch_set(&self.base_dir)))
            .options(self.decl.options.clone());
        if let Some(subdir) = &self.decl.subdir {
            builder = builder.subdir(subdir);
        }
        if let Some(policy) = &self.decl.sandbox {
            builder = builder.sandbox(policy.clone());
        }
        builder.build()
    }

    fn metadata(&self) -> Result<PackageMetadata> {
        let package = &self.decl.package;
        let mut package_ref = PackageRef::new(package.name.as_deref().unwrap_or(&self.decl.name))?
            .with_incompatible_digits(package.incompatible_digits);
        if let Some(group) = &package.group {
            package_ref = package_ref.with_group(group);
        }

        let mut metadata = PackageMetadata::new(package_ref, &package.description_short)?
            .with_provides(package.provides.iter().cloned());
        if let Some(version) = &package.version {
            metadata = metadata.with_version(LooseVersion::parse(version)?);
        }
        if let Some(text) = &package.description_long {
            metadata = metadata.with_description_long(text);
        }
        if let Some(section) = &package.section {
            metadata = metadata.with_section(section);
        }
        if let Some(homepage) = &package.homepage {
            metadata = metadata.with_homepage(homepage);
        }
        if let Some(license) = &package.license {
            metadata = metadata.with_license(license);
        }
        metadata.validate()?;
        Ok(metadata)
    }

    /// Packaging spec before per-target refinement
    fn packaging(&self, config: &RunConfig) -> Result<PackagingSpec> {
        let metadata = self.metadata()?;
        if let Some(import) = &self.decl.import {
            let fetcher = import.source.fetcher(&self.base_dir)?;
            let importer = importer_for(&import.format)?;
            let excluded: Vec<&str> = import.exclude_groups.iter().map(String::as_str).collect();
            let description = import_from(
                fetcher.as_ref(),
                import.subdir.as_deref(),
                importer.as_ref(),
                config,
            )?
            .without_groups(&excluded);
            return description.into_packaging_spec(metadata);
        }

        let subpackages = self
            .decl
            .subpackages
            .iter()
            .cloned()
            .map(|entry| entry.into_imported().map(|p| p.into_subpackage()))
            .collect::<Result<Vec<_>>>()?;
        PackagingSpec::new(metadata, subpackages)
    }
}

impl RecipeUnit for RecipeEntry {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn depends(&self) -> &[String] {
        &self.decl.depends
    }

    fn pipeline(&self, config: &RunConfig) -> Result<BuildPipeline> {
        let recipe = self.recipe()?;
        let packaging = self.packaging(config)?;

        let mut pipeline = BuildPipeline::new(&self.decl.name, recipe);
        for target in &self.targets {
            let mut spec = packaging.clone();
            if let Some(overrides) = self.decl.per_target.get(target.name()) {
                spec.metadata = spec.metadata.overlay(overrides);
            }
            pipeline = pipeline.target(target.clone(), spec);
        }
        pipeline.validate()?;
        debug!(
            "Built pipeline {} with {} target(s)",
            self.decl.name,
            self.targets.len()
        );
        Ok(pipeline)
    }
}
