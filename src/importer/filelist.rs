// src/importer/filelist.rs

//! Per-package file lists
//!
//! Every `<package>.install` or `<package>.files` file in the directory
//! describes one package. Each non-comment line holds a pattern, optionally
//! followed by a destination column that is ignored. A leading `!` turns the
//! pattern into an exclusion, a leading `=` into a shared pattern.
//! `${VARIABLE}` placeholders match any single path component.
//!
//! Packages come out in file-name order.

use super::{ImportedDescription, ImportedPackage, PackagingDescriptionImporter};
use crate::error::{Error, Result};
use crate::package::{FileRules, PackageRef};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

const SUFFIXES: &[&str] = &[".install", ".files"];

#[derive(Debug, Default, Clone, Copy)]
pub struct FileListImporter;

impl FileListImporter {
    pub fn new() -> Self {
        Self
    }
}

fn package_name(file_name: &str) -> Option<&str> {
    SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
}

/// Replace every `${NAME}` with `*`
fn expand_placeholders(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("${") {
        match rest[start..].find('}') {
            Some(len) => {
                out.push_str(&rest[..start]);
                out.push('*');
                rest = &rest[start + len + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

fn parse_list(content: &str, rules: &mut FileRules) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(pattern) = line.split_whitespace().next() else {
            continue;
        };
        let pattern = expand_placeholders(pattern);

        if let Some(rest) = pattern.strip_prefix('!') {
            rules.exclude.push(rest.to_string());
        } else if let Some(rest) = pattern.strip_prefix('=') {
            rules.shared.push(rest.to_string());
        } else {
            rules.include.push(pattern);
        }
    }
}

impl PackagingDescriptionImporter for FileListImporter {
    fn name(&self) -> &'static str {
        "file-list"
    }

    fn parse(&self, directory: &Path) -> Result<ImportedDescription> {
        let mut packages: BTreeMap<String, FileRules> = BTreeMap::new();

        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(name) = package_name(&file_name) else {
                continue;
            };

            let content = fs::read_to_string(entry.path())?;
            let rules = packages.entry(name.to_string()).or_default();
            parse_list(&content, rules);
            debug!("{}: {} pattern(s)", file_name, rules.include.len());
        }

        let mut pkgs = Vec::with_capacity(packages.len());
        for (name, rules) in packages {
            let package = PackageRef::new(&name).map_err(|e| {
                Error::ParseError(format!("{}: {}", directory.display(), e))
            })?;
            rules.validate()?;
            pkgs.push(ImportedPackage::new(package, rules));
        }
        Ok(ImportedDescription { pkgs })
    }
}
