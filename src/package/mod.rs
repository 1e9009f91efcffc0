// src/package/mod.rs

//! Distro-agnostic package identity and metadata
//!
//! - [`PackageRef`]: a name plus an ABI-family policy
//! - [`VersionedPackageRef`]: a ref pinned to a [`LooseVersion`]
//! - [`PackageMetadata`]: descriptive fields shared by every target
//! - [`PackagingSpec`]: metadata plus subpackages partitioning the installed files
//!
//! Targets turn these into concrete package names and control data; nothing
//! in here knows about any particular distribution.

mod rules;

pub use rules::{FileAssignment, FileRules};

use crate::error::{Error, Result};
use crate::version::LooseVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Identity of a package
///
/// `incompatible_digits` is how many leading version components form an
/// ABI-compatible family: with `1`, versions `1.8.16` and `1.9.0` share a
/// family while `2.0` starts a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default)]
    incompatible_digits: usize,
}

impl PackageRef {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_package_name(&name)?;
        Ok(Self {
            name,
            group: None,
            incompatible_digits: 0,
        })
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_incompatible_digits(mut self, digits: usize) -> Self {
        self.incompatible_digits = digits;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn incompatible_digits(&self) -> usize {
        self.incompatible_digits
    }

    /// Explicit group, or one inferred from the naming convention
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().or_else(|| infer_group(&self.name))
    }

    pub fn versioned(self, version: LooseVersion) -> VersionedPackageRef {
        VersionedPackageRef {
            package: self,
            version,
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Group implied by common subpackage naming
fn infer_group(name: &str) -> Option<&'static str> {
    if name.starts_with("python3-") {
        Some("python3")
    } else if name.starts_with("python-") {
        Some("python2")
    } else if name.ends_with("-dev") {
        Some("dev")
    } else if name.ends_with("-doc") {
        Some("doc")
    } else if name.starts_with("lib") {
        Some("lib")
    } else {
        None
    }
}

fn validate_package_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_'));
    if valid {
        Ok(())
    } else {
        Err(Error::ParseError(format!("Invalid package name '{}'", name)))
    }
}

/// A package ref pinned to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedPackageRef {
    #[serde(flatten)]
    package: PackageRef,
    version: LooseVersion,
}

impl VersionedPackageRef {
    pub fn new(package: PackageRef, version: LooseVersion) -> Self {
        Self { package, version }
    }

    pub fn package(&self) -> &PackageRef {
        &self.package
    }

    pub fn version(&self) -> &LooseVersion {
        &self.version
    }

    /// Name that keeps ABI-incompatible builds installable side by side
    ///
    /// `modulemd` at `1.8.16` with one incompatible digit becomes `modulemd1`.
    /// A name already ending in a digit gets a `-` separator (`foo2-1`).
    pub fn family_name(&self) -> String {
        let digits = self.package.incompatible_digits;
        if digits == 0 {
            return self.package.name.clone();
        }
        let suffix = self.version.prefix(digits);
        if self.package.name.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}-{}", self.package.name, suffix)
        } else {
            format!("{}{}", self.package.name, suffix)
        }
    }
}

impl fmt::Display for VersionedPackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package.name, self.version)
    }
}

/// Descriptive fields of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package: PackageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<LooseVersion>,
    pub description_short: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    #[serde(default = "default_section")]
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub provides: BTreeSet<String>,
}

fn default_section() -> String {
    "misc".to_string()
}

impl PackageMetadata {
    pub fn new(package: PackageRef, description_short: impl Into<String>) -> Result<Self> {
        let metadata = Self {
            package,
            version: None,
            description_short: description_short.into(),
            description_long: None,
            section: default_section(),
            homepage: None,
            license: None,
            provides: BTreeSet::new(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn with_version(mut self, version: LooseVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_description_long(mut self, text: impl Into<String>) -> Self {
        self.description_long = Some(text.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    pub fn with_provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.description_short.trim().is_empty() {
            return Err(Error::ParseError(format!(
                "Package {} has an empty short description",
                self.package
            )));
        }
        if let Some(homepage) = &self.homepage {
            url::Url::parse(homepage).map_err(|e| {
                Error::ParseError(format!("Package {} homepage '{}': {}", self.package, homepage, e))
            })?;
        }
        Ok(())
    }

    pub fn versioned_ref(&self) -> Option<VersionedPackageRef> {
        self.version
            .clone()
            .map(|v| VersionedPackageRef::new(self.package.clone(), v))
    }

    /// Name the package is published under
    pub fn package_name(&self) -> String {
        match self.versioned_ref() {
            Some(versioned) => versioned.family_name(),
            None => self.package.name.clone(),
        }
    }

    /// Apply the fields present in `overrides`; absent fields keep their value
    pub fn overlay(&self, overrides: &MetadataOverrides) -> PackageMetadata {
        let mut merged = self.clone();
        if let Some(v) = &overrides.description_short {
            merged.description_short = v.clone();
        }
        if let Some(v) = &overrides.description_long {
            merged.description_long = Some(v.clone());
        }
        if let Some(v) = &overrides.section {
            merged.section = v.clone();
        }
        if let Some(v) = &overrides.homepage {
            merged.homepage = Some(v.clone());
        }
        if let Some(v) = &overrides.license {
            merged.license = Some(v.clone());
        }
        merged.provides.extend(overrides.provides.iter().cloned());
        merged
    }
}

/// Partial metadata for a subpackage; only present fields override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
}

/// One installable package carved out of a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpackageSpec {
    pub package: PackageRef,
    pub rules: FileRules,
    #[serde(default)]
    pub overrides: MetadataOverrides,
}

impl SubpackageSpec {
    pub fn new(package: PackageRef, rules: FileRules) -> Self {
        Self {
            package,
            rules,
            overrides: MetadataOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: MetadataOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Metadata plus the subpackages one build is split into
///
/// An empty subpackage list means a single package holding every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingSpec {
    pub metadata: PackageMetadata,
    #[serde(default)]
    pub subpackages: Vec<SubpackageSpec>,
}

impl PackagingSpec {
    pub fn new(metadata: PackageMetadata, subpackages: Vec<SubpackageSpec>) -> Result<Self> {
        let spec = Self {
            metadata,
            subpackages,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// A spec that packages the whole tree under the metadata's name
    pub fn single(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            subpackages: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.metadata.validate()?;
        let mut seen = HashSet::new();
        for sub in &self.subpackages {
            if !seen.insert(sub.package.name()) {
                return Err(Error::ParseError(format!(
                    "Duplicate subpackage '{}' in packaging spec for {}",
                    sub.package, self.metadata.package
                )));
            }
            sub.rules.validate()?;
            self.metadata.overlay(&sub.overrides).validate()?;
        }
        Ok(())
    }

    /// Keep only subpackages for which `keep` returns true
    pub fn retain_subpackages<F>(&mut self, mut keep: F)
    where
        F: FnMut(&SubpackageSpec) -> bool,
    {
        self.subpackages.retain(|s| keep(s));
    }

    /// Effective metadata of every package this spec produces, in order
    pub fn packages(&self) -> Vec<PackageMetadata> {
        if self.subpackages.is_empty() {
            return vec![self.metadata.clone()];
        }
        self.subpackages
            .iter()
            .map(|sub| {
                let mut merged = self.metadata.overlay(&sub.overrides);
                merged.package = sub.package.clone();
                merged
            })
            .collect()
    }

    /// Split a list of installed files between the packages of this spec
    pub fn assign<'a, I>(&self, files: I) -> FileAssignment
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.subpackages.is_empty() {
            let name = self.metadata.package_name();
            return FileAssignment::single(name, files);
        }
        let packages: Vec<(String, &FileRules)> = self
            .packages()
            .iter()
            .map(PackageMetadata::package_name)
            .zip(self.subpackages.iter().map(|s| &s.rules))
            .collect();
        FileAssignment::compute(&packages, files)
    }
}

impl From<PackageMetadata> for PackagingSpec {
    fn from(metadata: PackageMetadata) -> Self {
        Self::single(metadata)
    }
}
