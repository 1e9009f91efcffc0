// src/recipe/mod.rs

//! Build recipes
//!
//! A [`BuildRecipe`] describes how to obtain, patch and build one upstream
//! project: one fetcher, an ordered list of patch sets, one build-system
//! adapter and its options. Recipes are immutable once built through
//! [`RecipeBuilder`].
//!
//! The [`Fingerprint`] of a recipe captures everything that influences the
//! installed tree and keys the [`BuildCache`]. [`RecipeGraph`] orders
//! recipes that depend on each other.

mod cache;
mod graph;

pub use cache::{BuildCache, CacheConfig, CacheEntry, CacheStats};
pub use graph::RecipeGraph;

use crate::build::{BuildOptions, BuildSystemAdapter, OptionValue, SandboxPolicy};
use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;
use crate::hash::{HashAlgorithm, Hasher};
use crate::patch::PatchSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Cache key derived from a recipe's inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex digest (as stored in cache metadata)
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() < 16 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("Invalid fingerprint: {}", hex)));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How to obtain, patch and build one upstream project
#[derive(Debug, Clone)]
pub struct BuildRecipe {
    adapter: Arc<dyn BuildSystemAdapter>,
    fetcher: Arc<dyn SourceFetcher>,
    patches: Vec<PatchSet>,
    options: BuildOptions,
    subdir: Option<PathBuf>,
    sandbox: Option<SandboxPolicy>,
}

impl BuildRecipe {
    pub fn builder(
        adapter: Arc<dyn BuildSystemAdapter>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> RecipeBuilder {
        RecipeBuilder {
            recipe: BuildRecipe {
                adapter,
                fetcher,
                patches: Vec::new(),
                options: BuildOptions::new(),
                subdir: None,
                sandbox: None,
            },
        }
    }

    pub fn adapter(&self) -> &dyn BuildSystemAdapter {
        self.adapter.as_ref()
    }

    pub fn fetcher(&self) -> &dyn SourceFetcher {
        self.fetcher.as_ref()
    }

    pub fn patches(&self) -> &[PatchSet] {
        &self.patches
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn subdir(&self) -> Option<&Path> {
        self.subdir.as_deref()
    }

    pub fn sandbox(&self) -> Option<&SandboxPolicy> {
        self.sandbox.as_ref()
    }

    /// Fingerprint computable before fetching, for pinned sources only
    pub fn pinned_fingerprint(&self) -> Result<Option<Fingerprint>> {
        if self.fetcher.is_pinned() {
            self.fingerprint(None).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Digest of adapter, source, revision, subdir, options, sandbox and patches
    ///
    /// `revision` is only mixed in for unpinned sources; a pinned identity
    /// already determines the tree, so pinned fingerprints are the same
    /// before and after fetching.
    pub fn fingerprint(&self, revision: Option<&str>) -> Result<Fingerprint> {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.field("adapter", self.adapter.name().as_bytes());
        hasher.field("source", self.fetcher.identity().as_bytes());
        if !self.fetcher.is_pinned()
            && let Some(rev) = revision
        {
            hasher.field("revision", rev.as_bytes());
        }
        if let Some(subdir) = &self.subdir {
            hasher.field("subdir", subdir.to_string_lossy().as_bytes());
        }
        self.options.digest_into(&mut hasher);
        if let Some(policy) = &self.sandbox {
            policy.digest_into(&mut hasher);
        }
        for set in &self.patches {
            set.digest_into(&mut hasher)?;
        }
        Ok(Fingerprint(hasher.finalize().value))
    }
}

/// Step-by-step construction of a [`BuildRecipe`]
#[derive(Debug)]
pub struct RecipeBuilder {
    recipe: BuildRecipe,
}

impl RecipeBuilder {
    pub fn patch(mut self, set: PatchSet) -> Self {
        self.recipe.patches.push(set);
        self
    }

    pub fn patches(mut self, sets: impl IntoIterator<Item = PatchSet>) -> Self {
        self.recipe.patches.extend(sets);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.recipe.options.insert(key, value);
        self
    }

    pub fn options(mut self, options: BuildOptions) -> Self {
        for (key, value) in options.iter() {
            self.recipe.options.insert(key, value.clone());
        }
        self
    }

    pub fn subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.recipe.subdir = Some(subdir.into());
        self
    }

    pub fn sandbox(mut self, policy: SandboxPolicy) -> Self {
        self.recipe.sandbox = Some(policy);
        self
    }

    pub fn build(self) -> Result<BuildRecipe> {
        if let Some(subdir) = &self.recipe.subdir
            && subdir
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::ConfigError(format!(
                "Recipe subdir {} must be relative and stay inside the source tree",
                subdir.display()
            )));
        }
        for set in &self.recipe.patches {
            if !set.path().exists() {
                return Err(Error::NotFound(format!(
                    "Patch set {}",
                    set.path().display()
                )));
            }
        }
        Ok(self.recipe)
    }
}
