// src/importer/described.rs

//! `packages.toml` descriptions
//!
//! ```toml
//! [[package]]
//! name = "librpm9"
//! include = ["usr/lib/*/librpm*.so.*"]
//!
//! [[package]]
//! name = "librpm-dev"
//! group = "dev"
//! include = ["usr/include/rpm", "usr/lib/*/librpm*.so"]
//! description_short = "RPM development files"
//! ```
//!
//! Metadata keys are optional and only override the recipe's metadata when
//! present.

use super::{ImportedDescription, ImportedPackage, PackagingDescriptionImporter};
use crate::error::{Error, Result};
use crate::package::{FileRules, MetadataOverrides, PackageRef};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// File read from the description directory
pub const DESCRIPTION_FILE: &str = "packages.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptionFile {
    #[serde(default, rename = "package")]
    packages: Vec<PackageEntry>,
}

/// One `[[package]]` table; also the shape of catalogue subpackages
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PackageEntry {
    name: String,
    group: Option<String>,
    #[serde(default)]
    incompatible_digits: usize,
    #[serde(flatten)]
    rules: FileRules,
    #[serde(flatten)]
    overrides: MetadataOverrides,
}

impl PackageEntry {
    pub(crate) fn into_imported(self) -> Result<ImportedPackage> {
        let mut package =
            PackageRef::new(self.name)?.with_incompatible_digits(self.incompatible_digits);
        if let Some(group) = self.group {
            package = package.with_group(group);
        }
        self.rules.validate()?;
        Ok(ImportedPackage {
            package,
            rules: self.rules,
            overrides: self.overrides,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TomlDescriptionImporter;

impl TomlDescriptionImporter {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_str(&self, content: &str) -> Result<ImportedDescription> {
        let file: DescriptionFile = toml::from_str(content)
            .map_err(|e| Error::ParseError(format!("{}: {}", DESCRIPTION_FILE, e)))?;

        let pkgs = file
            .packages
            .into_iter()
            .map(PackageEntry::into_imported)
            .collect::<Result<Vec<_>>>()?;
        Ok(ImportedDescription { pkgs })
    }
}

impl PackagingDescriptionImporter for TomlDescriptionImporter {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn parse(&self, directory: &Path) -> Result<ImportedDescription> {
        let path = directory.join(DESCRIPTION_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::NotFound(format!("{}: {}", path.display(), e))
        })?;
        self.parse_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DESCRIPTION: &str = r#"
[[package]]
name = "librpm9"
include = ["usr/lib/*/librpm*.so.*"]

[[package]]
name = "python-rpm"
include = ["usr/lib/python2*"]

[[package]]
name = "rpm-tools"
group = "tools"
include = ["usr/bin"]
exclude = ["usr/bin/rpm2cpio"]
shared = ["usr/share/doc/rpm"]
description_short = "RPM command line tools"
section = "admin"
"#;

    #[test]
    fn test_parse_entries() {
        let description = TomlDescriptionImporter::new().parse_str(DESCRIPTION).unwrap();
        assert_eq!(description.names(), vec!["librpm9", "python-rpm", "rpm-tools"]);

        let tools = &description.pkgs[2];
        assert_eq!(tools.package.group(), Some("tools"));
        assert_eq!(tools.rules.exclude, vec!["usr/bin/rpm2cpio"]);
        assert_eq!(tools.rules.shared, vec!["usr/share/doc/rpm"]);
        assert_eq!(tools.overrides.description_short.as_deref(), Some("RPM command line tools"));
        assert_eq!(tools.overrides.section.as_deref(), Some("admin"));
        assert_eq!(tools.overrides.homepage, None);

        assert_eq!(description.pkgs[0].overrides, MetadataOverrides::default());
    }

    #[test]
    fn test_filter_python2() {
        let description = TomlDescriptionImporter::new()
            .parse_str(DESCRIPTION)
            .unwrap()
            .without_groups(&["python2"]);
        assert_eq!(description.names(), vec!["librpm9", "rpm-tools"]);
    }

    #[test]
    fn test_parse_directory() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            TomlDescriptionImporter::new().parse(temp.path()),
            Err(Error::NotFound(_))
        ));
        fs::write(temp.path().join(DESCRIPTION_FILE), DESCRIPTION).unwrap();
        assert_eq!(TomlDescriptionImporter::new().parse(temp.path()).unwrap().len(), 3);
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let bad = "[[package]]\nname = \"x\"\ninclude = [\"usr/[\"]\n";
        assert!(TomlDescriptionImporter::new().parse_str(bad).is_err());
    }
}
