// src/target/tarball.rs

//! Tarball reference target
//!
//! For each package of a spec this writes, under `<output>/<target>/`:
//!
//! - `<name>_<version>.tar.gz`: the package's files, paths relative to `/`
//! - `<name>.manifest.json`: identity, metadata and the file list
//!
//! Both files are written to a temporary name and renamed into place.

use super::{PackageArtifact, TargetDistribution};
use crate::build::ArtifactTree;
use crate::error::{Error, Result};
use crate::package::{PackageMetadata, PackagingSpec};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Suffix of manifest files
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// What a produced package contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub target: String,
    pub section: String,
    pub description_short: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    /// Archive file name next to the manifest
    pub archive: String,
    pub files: Vec<String>,
    pub created: DateTime<Utc>,
}

/// Writes one `.tar.gz` plus manifest per package
#[derive(Debug, Clone)]
pub struct TarballDistribution {
    name: String,
    compression: u32,
    /// Fail when installed files are claimed by no package
    strict: bool,
}

impl TarballDistribution {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compression: 6,
            strict: true,
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = level.min(9);
        self
    }

    /// Accept unclaimed files with a warning instead of failing
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Packaging {
            target: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn write_package(
        &self,
        tree: &ArtifactTree,
        meta: &PackageMetadata,
        files: &[String],
        dir: &Path,
    ) -> Result<PackageArtifact> {
        let name = meta.package_name();
        let version = meta.version.as_ref().map(|v| v.to_string());
        let archive_name = match &version {
            Some(v) => format!("{}_{}.tar.gz", name, v),
            None => format!("{}.tar.gz", name),
        };
        let archive_path = dir.join(&archive_name);

        let tmp = NamedTempFile::new_in(dir)?;
        {
            let encoder = GzEncoder::new(tmp.as_file(), Compression::new(self.compression));
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);
            for file in files {
                builder.append_path_with_name(tree.root().join(file), file)?;
            }
            let mut encoder = builder.into_inner()?;
            encoder.flush()?;
            encoder.finish()?;
        }
        publish(tmp, &archive_path)?;

        let manifest = PackageManifest {
            name: name.clone(),
            version: version.clone(),
            target: self.name.clone(),
            section: meta.section.clone(),
            description_short: meta.description_short.clone(),
            description_long: meta.description_long.clone(),
            homepage: meta.homepage.clone(),
            license: meta.license.clone(),
            provides: meta.provides.iter().cloned().collect(),
            archive: archive_name,
            files: files.to_vec(),
            created: Utc::now(),
        };
        let manifest_path = dir.join(format!("{}{}", name, MANIFEST_SUFFIX));
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::IoError(format!("Failed to encode manifest: {}", e)))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        publish(tmp, &manifest_path)?;

        debug!("Wrote {} ({} files)", archive_path.display(), files.len());
        Ok(PackageArtifact {
            package: name,
            version,
            target: self.name.clone(),
            path: archive_path,
            manifest: manifest_path,
            file_count: files.len(),
        })
    }

    fn package_inner(
        &self,
        tree: &ArtifactTree,
        spec: &PackagingSpec,
        output_dir: &Path,
    ) -> Result<Vec<PackageArtifact>> {
        spec.validate()?;
        let files = tree.files()?;
        let assignment = spec.assign(files.iter().map(String::as_str));

        if !assignment.unassigned().is_empty() {
            let sample: Vec<&str> = assignment
                .unassigned()
                .iter()
                .take(10)
                .map(String::as_str)
                .collect();
            let message = format!(
                "{} installed file(s) belong to no package: {}",
                assignment.unassigned().len(),
                sample.join(", ")
            );
            if self.strict {
                return Err(self.error(message));
            }
            warn!("{}: {}", self.name, message);
        }
        for empty in assignment.empty_packages() {
            warn!("{}: package {} has no files", self.name, empty);
        }

        let dir = output_dir.join(&self.name);
        fs::create_dir_all(&dir)?;

        let mut artifacts = Vec::new();
        for meta in spec.packages() {
            let name = meta.package_name();
            let files = assignment.files_for(&name).unwrap_or_default();
            artifacts.push(self.write_package(tree, &meta, files, &dir)?);
        }
        Ok(artifacts)
    }
}

impl TargetDistribution for TarballDistribution {
    fn name(&self) -> &str {
        &self.name
    }

    fn package(
        &self,
        tree: &ArtifactTree,
        spec: &PackagingSpec,
        output_dir: &Path,
    ) -> Result<Vec<PackageArtifact>> {
        let artifacts = self
            .package_inner(tree, spec, output_dir)
            .map_err(|e| match e {
                Error::Packaging { .. } | Error::Cancelled(_) => e,
                other => self.error(other.to_string()),
            })?;
        info!(
            "{}: packaged {}",
            self.name,
            artifacts
                .iter()
                .map(|a| a.package.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(artifacts)
    }
}

/// Read one manifest file
pub fn read_manifest(path: &Path) -> Result<PackageManifest> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))
}

/// Every manifest in a target's output directory, sorted by package name
pub fn inspect(target_dir: &Path) -> Result<Vec<PackageManifest>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(target_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(MANIFEST_SUFFIX))
        })
        .collect();
    paths.sort();
    paths.iter().map(|p| read_manifest(p)).collect()
}

/// Move a finished temp file into place, readable like any published file
fn publish(tmp: NamedTempFile, path: &Path) -> Result<()> {
    // NamedTempFile creates 0600
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    tmp.persist(path)
        .map_err(|e| Error::IoError(format!("{}: {}", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{FileRules, PackageRef, SubpackageSpec};
    use crate::version::LooseVersion;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn staged(root: &Path) -> ArtifactTree {
        for (path, content) in [
            ("usr/lib/libzck.so.1", "lib"),
            ("usr/include/zck.h", "header"),
            ("usr/bin/zck", "bin"),
        ] {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        std::os::unix::fs::symlink("libzck.so.1", root.join("usr/lib/libzck.so")).unwrap();
        ArtifactTree::new(root)
    }

    fn metadata() -> PackageMetadata {
        PackageMetadata::new(PackageRef::new("zchunk").unwrap(), "Efficient delta format")
            .unwrap()
            .with_section("devel")
            .with_version(LooseVersion::parse("1.1.5").unwrap())
            .with_provides(["zchunk"])
    }

    fn archive_entries(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(path).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_single_package() {
        let temp = TempDir::new().unwrap();
        let tree = staged(&temp.path().join("stage"));
        let out = temp.path().join("out");
        let target = TarballDistribution::new("debian");

        let artifacts = target
            .package(&tree, &PackagingSpec::single(metadata()), &out)
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, out.join("debian/zchunk_1.1.5.tar.gz"));
        assert_eq!(artifacts[0].file_count, 4);
        assert_eq!(archive_entries(&artifacts[0].path).len(), 4);

        let manifest = read_manifest(&artifacts[0].manifest).unwrap();
        assert_eq!(manifest.target, "debian");
        assert_eq!(manifest.section, "devel");
        assert_eq!(manifest.provides, vec!["zchunk"]);
        assert!(manifest.files.contains(&"usr/lib/libzck.so".to_string()));
    }

    #[test]
    fn test_published_files_are_world_readable() {
        let temp = TempDir::new().unwrap();
        let tree = staged(&temp.path().join("stage"));
        let out = temp.path().join("out");
        let artifacts = TarballDistribution::new("debian")
            .package(&tree, &PackagingSpec::single(metadata()), &out)
            .unwrap();

        for path in [&artifacts[0].path, &artifacts[0].manifest] {
            let mode = fs::metadata(path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o644, "{}", path.display());
        }
    }

    #[test]
    fn test_subpackages_partition_files() {
        let temp = TempDir::new().unwrap();
        let tree = staged(&temp.path().join("stage"));
        let out = temp.path().join("out");
        let spec = PackagingSpec::new(
            metadata(),
            vec![
                SubpackageSpec::new(
                    PackageRef::new("libzck-dev").unwrap(),
                    FileRules::include(["usr/include", "usr/lib/*.so"]),
                ),
                SubpackageSpec::new(
                    PackageRef::new("libzck1").unwrap(),
                    FileRules::include(["usr/lib/*.so.*"]),
                ),
                SubpackageSpec::new(
                    PackageRef::new("zchunk-tools").unwrap(),
                    FileRules::include(["usr/bin/**"]),
                ),
            ],
        )
        .unwrap();

        TarballDistribution::new("debian").package(&tree, &spec, &out).unwrap();
        let manifests = inspect(&out.join("debian")).unwrap();
        let names: Vec<&str> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["libzck-dev", "libzck1", "zchunk-tools"]);
        assert_eq!(
            manifests[0].files,
            vec!["usr/include/zck.h", "usr/lib/libzck.so"]
        );
        assert_eq!(manifests[1].files, vec!["usr/lib/libzck.so.1"]);
        assert_eq!(manifests[2].files, vec!["usr/bin/zck"]);
    }

    #[test]
    fn test_unassigned_files_fail_strict_target() {
        let temp = TempDir::new().unwrap();
        let tree = staged(&temp.path().join("stage"));
        let out = temp.path().join("out");
        let spec = PackagingSpec::new(
            metadata(),
            vec![SubpackageSpec::new(
                PackageRef::new("zchunk-tools").unwrap(),
                FileRules::include(["usr/bin/**"]),
            )],
        )
        .unwrap();

        let err = TarballDistribution::new("debian")
            .package(&tree, &spec, &out)
            .unwrap_err();
        assert!(matches!(err, Error::Packaging { ref target, .. } if target == "debian"));

        let artifacts = TarballDistribution::new("debian")
            .lenient()
            .package(&tree, &spec, &out)
            .unwrap();
        assert_eq!(artifacts[0].file_count, 1);
    }

    #[test]
    fn test_repackaging_replaces_artifacts() {
        let temp = TempDir::new().unwrap();
        let tree = staged(&temp.path().join("stage"));
        let out = temp.path().join("out");
        let target = TarballDistribution::new("debian");
        let spec = PackagingSpec::single(metadata());

        target.package(&tree, &spec, &out).unwrap();
        target.package(&tree, &spec, &out).unwrap();
        assert_eq!(fs::read_dir(out.join("debian")).unwrap().count(), 2);
    }
}
