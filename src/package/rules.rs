// src/package/rules.rs

//! File-membership rules for subpackages
//!
//! Paths are relative to the staging root and use `/` separators
//! (`usr/lib/librpm.so.9`). Patterns are globs where `*` stays within one
//! path component and `**` crosses directories. A pattern that matches a
//! directory claims everything below it, so `usr/include/rpm` works the same
//! as `usr/include/rpm/**`.
//!
//! # Assignment
//!
//! Files are claimed by the first subpackage, in declaration order, whose
//! `include` patterns match and whose `exclude` patterns do not. Patterns in
//! `shared` add a file to that subpackage without claiming it, which is the
//! only way a file ends up in more than one package. Files nobody claims are
//! reported, never silently dropped.

use crate::error::{Error, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Patterns deciding which files belong to a subpackage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRules {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared: Vec<String>,
}

impl FileRules {
    pub fn include<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: patterns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_shared<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self) -> Result<()> {
        for pattern in self.include.iter().chain(&self.exclude).chain(&self.shared) {
            compile(pattern)?;
        }
        Ok(())
    }

    fn compiled(&self) -> CompiledRules {
        CompiledRules {
            include: compile_all(&self.include),
            exclude: compile_all(&self.exclude),
            shared: compile_all(&self.shared),
        }
    }
}

struct CompiledRules {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    shared: Vec<Pattern>,
}

impl CompiledRules {
    fn claims(&self, path: &str) -> bool {
        matches_any(&self.include, path) && !matches_any(&self.exclude, path)
    }

    fn shares(&self, path: &str) -> bool {
        matches_any(&self.shared, path) && !matches_any(&self.exclude, path)
    }
}

fn normalize(pattern: &str) -> &str {
    pattern.trim().trim_start_matches('/').trim_end_matches('/')
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(normalize(pattern))
        .map_err(|e| Error::ParseError(format!("Invalid file pattern '{}': {}", pattern, e)))
}

/// Patterns are validated up front; anything that still fails is skipped
fn compile_all(patterns: &[String]) -> Vec<Pattern> {
    patterns.iter().filter_map(|p| compile(p).ok()).collect()
}

/// Whether a pattern matches the path itself or one of its parent directories
fn matches_any(patterns: &[Pattern], path: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.matches_with(path, MATCH_OPTIONS) {
            return true;
        }
        path.match_indices('/')
            .any(|(idx, _)| pattern.matches_with(&path[..idx], MATCH_OPTIONS))
    })
}

/// Result of splitting a file list between packages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAssignment {
    /// Package name and its files, in declaration order
    packages: Vec<(String, Vec<String>)>,
    unassigned: Vec<String>,
}

impl FileAssignment {
    /// Everything goes to one package
    pub fn single<'a, I>(name: String, files: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut all: Vec<String> = files.into_iter().map(|f| normalize(f).to_string()).collect();
        all.sort();
        all.dedup();
        Self {
            packages: vec![(name, all)],
            unassigned: Vec::new(),
        }
    }

    /// Assign files to `packages` with first-match-wins semantics
    pub fn compute<'a, I>(packages: &[(String, &FileRules)], files: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let compiled: Vec<CompiledRules> = packages.iter().map(|(_, r)| r.compiled()).collect();
        let mut buckets: Vec<Vec<String>> = vec![Vec::new(); packages.len()];
        let mut unassigned = Vec::new();

        let mut all: Vec<&str> = files.into_iter().map(normalize).collect();
        all.sort_unstable();
        all.dedup();

        for file in all {
            // Sharing places a file without taking ownership from later claims
            let mut owned = false;
            let mut placed = false;
            for (idx, rules) in compiled.iter().enumerate() {
                if !owned && rules.claims(file) {
                    buckets[idx].push(file.to_string());
                    owned = true;
                    placed = true;
                } else if rules.shares(file) {
                    buckets[idx].push(file.to_string());
                    placed = true;
                }
            }
            if !placed {
                unassigned.push(file.to_string());
            }
        }

        Self {
            packages: packages
                .iter()
                .map(|(name, _)| name.clone())
                .zip(buckets)
                .collect(),
            unassigned,
        }
    }

    pub fn files_for(&self, name: &str) -> Option<&[String]> {
        self.packages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, files)| files.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.packages.iter().map(|(n, f)| (n.as_str(), f.as_slice()))
    }

    pub fn unassigned(&self) -> &[String] {
        &self.unassigned
    }

    /// Packages that ended up with no files
    pub fn empty_packages(&self) -> Vec<&str> {
        self.packages
            .iter()
            .filter(|(_, files)| files.is_empty())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// How many packages each file landed in
    pub fn membership_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for (_, files) in &self.packages {
            for file in files {
                *counts.entry(file.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &[&str] = &[
        "usr/bin/rpm",
        "usr/bin/rpm2cpio",
        "usr/include/rpm/rpmlib.h",
        "usr/lib/librpm.so",
        "usr/lib/librpm.so.9",
        "usr/lib/python3/dist-packages/rpm/__init__.py",
        "usr/share/doc/rpm/README",
        "usr/share/man/man8/rpm.8",
    ];

    #[test]
    fn test_directory_pattern_claims_children() {
        let rules = FileRules::include(["/usr/include/rpm/"]);
        let compiled = rules.compiled();
        assert!(compiled.claims("usr/include/rpm/rpmlib.h"));
        assert!(!compiled.claims("usr/include/rpmfoo.h"));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let compiled = FileRules::include(["usr/lib/*.so.*"]).compiled();
        assert!(compiled.claims("usr/lib/librpm.so.9"));
        assert!(!compiled.claims("usr/lib/x86_64/librpm.so.9"));
    }

    #[test]
    fn test_first_match_wins() {
        let dev = FileRules::include(["usr/include/**", "usr/lib/*.so"]);
        let lib = FileRules::include(["usr/lib/*.so*"]);
        let python = FileRules::include(["usr/lib/python3/**"]);
        let main = FileRules::include(["**"]);
        let packages = vec![
            ("librpm-dev".to_string(), &dev),
            ("librpm9".to_string(), &lib),
            ("python3-rpm".to_string(), &python),
            ("rpm".to_string(), &main),
        ];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());

        assert_eq!(
            assignment.files_for("librpm-dev").unwrap(),
            &["usr/include/rpm/rpmlib.h", "usr/lib/librpm.so"]
        );
        assert_eq!(assignment.files_for("librpm9").unwrap(), &["usr/lib/librpm.so.9"]);
        assert_eq!(assignment.files_for("python3-rpm").unwrap().len(), 1);
        assert_eq!(assignment.files_for("rpm").unwrap().len(), 4);
        assert!(assignment.unassigned().is_empty());
        assert!(assignment.membership_counts().values().all(|&c| c == 1));
    }

    #[test]
    fn test_exclude_and_unassigned() {
        let bin = FileRules::include(["usr/bin/**"]).with_exclude(["usr/bin/rpm2cpio"]);
        let packages = vec![("rpm".to_string(), &bin)];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());
        assert_eq!(assignment.files_for("rpm").unwrap(), &["usr/bin/rpm"]);
        assert!(assignment.unassigned().contains(&"usr/bin/rpm2cpio".to_string()));
        assert_eq!(assignment.unassigned().len(), TREE.len() - 1);
    }

    #[test]
    fn test_shared_files_are_duplicated() {
        let doc = FileRules::include(["usr/share/doc/**"]);
        let lib = FileRules::include(["usr/lib/librpm.so.9"]).with_shared(["usr/share/doc/**"]);
        let packages = vec![("rpm-doc".to_string(), &doc), ("librpm9".to_string(), &lib)];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());
        assert_eq!(assignment.files_for("rpm-doc").unwrap(), &["usr/share/doc/rpm/README"]);
        assert_eq!(
            assignment.files_for("librpm9").unwrap(),
            &["usr/lib/librpm.so.9", "usr/share/doc/rpm/README"]
        );
        assert_eq!(assignment.membership_counts()["usr/share/doc/rpm/README"], 2);
    }

    #[test]
    fn test_shared_match_leaves_file_claimable() {
        let lib = FileRules::include(["usr/lib/**"]).with_shared(["usr/share/doc/**"]);
        let doc = FileRules::include(["usr/share/doc/**"]);
        let packages = vec![("librpm9".to_string(), &lib), ("rpm-doc".to_string(), &doc)];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());
        assert_eq!(assignment.files_for("rpm-doc").unwrap(), &["usr/share/doc/rpm/README"]);
        assert!(
            assignment
                .files_for("librpm9")
                .unwrap()
                .contains(&"usr/share/doc/rpm/README".to_string())
        );
        assert_eq!(assignment.membership_counts()["usr/share/doc/rpm/README"], 2);
    }

    #[test]
    fn test_shared_only_file_is_not_unassigned() {
        let lib = FileRules::include(["usr/lib/librpm.so.9"]).with_shared(["usr/share/man/**"]);
        let packages = vec![("librpm9".to_string(), &lib)];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());
        assert!(!assignment.unassigned().contains(&"usr/share/man/man8/rpm.8".to_string()));
    }

    #[test]
    fn test_empty_packages_reported() {
        let nothing = FileRules::include(["opt/**"]);
        let packages = vec![("ghost".to_string(), &nothing)];
        let assignment = FileAssignment::compute(&packages, TREE.iter().copied());
        assert_eq!(assignment.empty_packages(), vec!["ghost"]);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(FileRules::include(["usr/[lib"]).validate().is_err());
    }

    #[test]
    fn test_single_assignment() {
        let assignment = FileAssignment::single("zchunk".to_string(), ["/usr/bin/zck", "usr/bin/zck"]);
        assert_eq!(assignment.files_for("zchunk").unwrap(), &["usr/bin/zck"]);
    }
}
