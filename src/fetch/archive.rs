// src/fetch/archive.rs

//! Release archives: discover, download, verify, unpack
//!
//! Discovery decides *which* archive to fetch and which checksum it must
//! have. Two strategies are provided:
//!
//! - [`StaticRelease`]: a fixed URL with a known checksum
//! - [`IndexPageDiscovery`]: scan a release index page with a regex and take
//!   the highest version, its checksum read from a sidecar file
//!
//! Downloads land in `downloads_tmp/archives`, keyed by checksum, written to
//! a `.tmp` file and renamed only after verification. A checksum mismatch is
//! always fatal. `file://` URLs are read from disk, which is how vendored
//! tarballs and tests avoid the network.

use super::{SourceFetcher, SourceTree, read_stamp, stage_then_rename, write_stamp};
use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::hash::{Checksum, verify_file};
use crate::version::LooseVersion;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use regex::Regex;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use xz2::read::XzDecoder;

/// Where the expected digest of a release comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumSource {
    Inline(Checksum),
    /// URL of a `sha256sum`-style file (`<digest>  <name>`)
    Sidecar(String),
}

/// A concrete archive chosen by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub url: String,
    pub version: Option<LooseVersion>,
    pub checksum: ChecksumSource,
}

/// Strategy for finding the archive to download
pub trait ReleaseDiscovery: Send + Sync + fmt::Debug {
    fn identity(&self) -> String;
    /// True when the release cannot change behind the same identity
    fn is_pinned(&self) -> bool {
        false
    }
    fn discover(&self, http: &HttpClient) -> Result<Release>;
}

/// A release whose location and checksum are known up front
#[derive(Debug, Clone)]
pub struct StaticRelease {
    release: Release,
}

impl StaticRelease {
    pub fn new(url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            release: Release {
                url: url.into(),
                version: None,
                checksum: ChecksumSource::Inline(checksum),
            },
        }
    }

    pub fn with_version(mut self, version: LooseVersion) -> Self {
        self.release.version = Some(version);
        self
    }
}

impl ReleaseDiscovery for StaticRelease {
    fn identity(&self) -> String {
        match &self.release.checksum {
            ChecksumSource::Inline(sum) => format!("{}@{}", self.release.url, sum),
            ChecksumSource::Sidecar(url) => format!("{}@{}", self.release.url, url),
        }
    }

    fn is_pinned(&self) -> bool {
        matches!(self.release.checksum, ChecksumSource::Inline(_))
    }

    fn discover(&self, _http: &HttpClient) -> Result<Release> {
        Ok(self.release.clone())
    }
}

/// Finds the newest archive linked from an index page
///
/// The pattern must capture the version, either as a group named `version`
/// or as the first group. The whole match is the (possibly relative) link.
#[derive(Debug, Clone)]
pub struct IndexPageDiscovery {
    index_url: String,
    pattern: Regex,
    checksum_suffix: String,
}

impl IndexPageDiscovery {
    pub fn new(index_url: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::ParseError(format!("Invalid release pattern '{}': {}", pattern, e)))?;
        if pattern.captures_len() < 2 {
            return Err(Error::ParseError(format!(
                "Release pattern '{}' must capture the version",
                pattern
            )));
        }
        Ok(Self {
            index_url: index_url.into(),
            pattern,
            checksum_suffix: ".sha256".to_string(),
        })
    }

    pub fn with_checksum_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.checksum_suffix = suffix.into();
        self
    }

    /// Pick the highest version linked from `page`
    pub fn select(&self, page: &str) -> Result<Release> {
        let base = Url::parse(&self.index_url)
            .map_err(|e| Error::Discovery(format!("Invalid index URL {}: {}", self.index_url, e)))?;

        let mut best: Option<(LooseVersion, String)> = None;
        for caps in self.pattern.captures_iter(page) {
            let Some(link) = caps.get(0) else { continue };
            let version_text = caps
                .name("version")
                .or_else(|| caps.get(1))
                .map(|m| m.as_str());
            let Some(version) = version_text.and_then(|v| LooseVersion::parse(v).ok()) else {
                debug!("Skipping unparsable release link {}", link.as_str());
                continue;
            };

            if best.as_ref().is_none_or(|(current, _)| version > *current) {
                best = Some((version, link.as_str().to_string()));
            }
        }

        let (version, link) = best.ok_or_else(|| {
            Error::Discovery(format!(
                "No release matching '{}' found at {}",
                self.pattern, self.index_url
            ))
        })?;
        let url = base
            .join(&link)
            .map_err(|e| Error::Discovery(format!("Bad release link '{}': {}", link, e)))?
            .to_string();

        info!("Discovered {} ({})", url, version);
        Ok(Release {
            checksum: ChecksumSource::Sidecar(format!("{}{}", url, self.checksum_suffix)),
            url,
            version: Some(version),
        })
    }
}

impl ReleaseDiscovery for IndexPageDiscovery {
    fn identity(&self) -> String {
        format!("{}~{}", self.index_url, self.pattern)
    }

    fn discover(&self, http: &HttpClient) -> Result<Release> {
        let page = http.get_text(&self.index_url).map_err(|e| match e {
            Error::Fetch { reason, .. } => {
                Error::Discovery(format!("Cannot read index {}: {}", self.index_url, reason))
            }
            other => other,
        })?;
        self.select(&page)
    }
}

/// Minimal blocking transfer client for `http(s)://` and `file://` URLs
pub struct HttpClient {
    client: reqwest::blocking::Client,
    cancel: CancelToken,
}

impl HttpClient {
    pub fn new(timeout: Option<Duration>, cancel: CancelToken) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(concat!("forgeline/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::IoError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, cancel })
    }

    fn parse(url: &str) -> Result<Url> {
        Url::parse(url).map_err(|e| Error::Fetch {
            source_ref: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })
    }

    fn local_path(url: &Url) -> Result<PathBuf> {
        url.to_file_path().map_err(|_| Error::Fetch {
            source_ref: url.to_string(),
            reason: "not a local path".to_string(),
        })
    }

    fn open(&self, url: &Url) -> Result<Box<dyn Read>> {
        if url.scheme() == "file" {
            let path = Self::local_path(url)?;
            let file = File::open(&path).map_err(|e| Error::Fetch {
                source_ref: url.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(Box::new(file));
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Fetch {
                source_ref: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(response))
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        let url = Self::parse(url)?;
        let mut reader = self.open(&url)?;
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|e| Error::Fetch {
            source_ref: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(text)
    }

    /// Stream `url` into `dest`, checking for cancellation between chunks
    pub fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let parsed = Self::parse(url)?;
        let mut reader = self.open(&parsed)?;
        let mut file = File::create(dest)?;
        let mut buffer = [0u8; 64 * 1024];

        loop {
            self.cancel.check("fetch")?;
            let n = reader.read(&mut buffer).map_err(|e| Error::Fetch {
                source_ref: url.to_string(),
                reason: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
        }
        file.sync_all()?;
        Ok(())
    }
}

/// Discover a release, download it, verify it and unpack it
#[derive(Debug)]
pub struct DiscoverDownloadVerifyUnpackFetcher {
    discovery: Box<dyn ReleaseDiscovery>,
}

impl DiscoverDownloadVerifyUnpackFetcher {
    pub fn new(discovery: impl ReleaseDiscovery + 'static) -> Self {
        Self {
            discovery: Box::new(discovery),
        }
    }

    fn resolve_checksum(&self, release: &Release, http: &HttpClient) -> Result<Checksum> {
        match &release.checksum {
            ChecksumSource::Inline(sum) => Ok(sum.clone()),
            ChecksumSource::Sidecar(url) => {
                let text = http.get_text(url)?;
                parse_sidecar(&text).map_err(|e| Error::Fetch {
                    source_ref: url.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Fetch the archive into the shared download area, reusing a verified copy
    fn download_verified(
        &self,
        release: &Release,
        checksum: &Checksum,
        http: &HttpClient,
        config: &RunConfig,
    ) -> Result<PathBuf> {
        let dir = config.downloads_tmp.join("archives");
        fs::create_dir_all(&dir)?;

        let filename = archive_filename(&release.url);
        let cached = dir.join(format!("{}-{}", &checksum.value[..16], filename));

        if cached.exists() {
            match verify_file(&cached, checksum) {
                Ok(()) => {
                    debug!("Using cached archive {}", cached.display());
                    return Ok(cached);
                }
                Err(_) => {
                    warn!("Cached archive {} is corrupt, re-downloading", cached.display());
                    fs::remove_file(&cached)?;
                }
            }
        }

        info!("Downloading {}", release.url);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", filename))
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        http.download(&release.url, temp.path())?;

        // The temp file is removed on drop when verification fails
        verify_file(temp.path(), checksum)?;
        temp.persist(&cached)
            .map_err(|e| Error::IoError(format!("Failed to store {}: {}", cached.display(), e)))?;
        Ok(cached)
    }
}

impl SourceFetcher for DiscoverDownloadVerifyUnpackFetcher {
    fn kind(&self) -> &'static str {
        "archive"
    }

    fn identity(&self) -> String {
        format!("archive+{}", self.discovery.identity())
    }

    fn is_pinned(&self) -> bool {
        self.discovery.is_pinned()
    }

    fn fetch(&self, dest: &Path, config: &RunConfig) -> Result<SourceTree> {
        config.cancel.check("fetch")?;

        if config.offline {
            return match read_stamp(dest) {
                Some(stamp) => Ok(SourceTree::new(dest, stamp_revision(&stamp))),
                None => Err(Error::Fetch {
                    source_ref: self.identity(),
                    reason: format!("offline mode and nothing unpacked at {}", dest.display()),
                }),
            };
        }

        let http = HttpClient::new(config.fetch_timeout, config.cancel.clone())?;
        let release = self.discovery.discover(&http)?;
        let checksum = self.resolve_checksum(&release, &http)?;
        let stamp = format!("{} {}", release.url, checksum);

        if read_stamp(dest).as_deref() == Some(stamp.as_str()) {
            debug!("{} already unpacked at {}", release.url, dest.display());
            return Ok(SourceTree::new(dest, Some(checksum.to_prefixed_string())));
        }

        let archive = self.download_verified(&release, &checksum, &http, config)?;
        stage_then_rename(dest, |staging| unpack_archive(&archive, staging))?;
        write_stamp(dest, &stamp)?;

        Ok(SourceTree::new(dest, Some(checksum.to_prefixed_string())))
    }
}

fn stamp_revision(stamp: &str) -> Option<String> {
    stamp.split_whitespace().nth(1).map(str::to_string)
}

fn archive_filename(url: &str) -> String {
    url.rsplit('/')
        .next()
        .map(|name| name.split(['?', '#']).next().unwrap_or(name))
        .filter(|name| !name.is_empty())
        .unwrap_or("source.tar.gz")
        .to_string()
}

/// Read the digest from a `sha256sum`-style file
fn parse_sidecar(text: &str) -> Result<Checksum> {
    let token = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(|line| line.split_whitespace().next())
        .ok_or_else(|| Error::ParseError("Empty checksum file".to_string()))?;
    Checksum::parse(token)
}

/// Unpack a tarball into `dest`
///
/// Supports: .tar.gz, .tgz, .tar.xz, .txz, .tar.bz2, .tbz2, .tar.zst, .tar
///
/// Archives usually wrap everything in one top-level directory
/// (`zchunk-1.1.5/`); in that case its contents become the root of `dest`.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let file = File::open(archive)?;
    let reader: Box<dyn Read> = if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
        Box::new(XzDecoder::new(file))
    } else if filename.ends_with(".tar.bz2") || filename.ends_with(".tbz2") {
        Box::new(BzDecoder::new(file))
    } else if filename.ends_with(".tar.zst") {
        Box::new(zstd::stream::read::Decoder::new(file).map_err(|e| {
            Error::IoError(format!("Failed to open zstd stream {}: {}", archive.display(), e))
        })?)
    } else if filename.ends_with(".tar") {
        Box::new(file)
    } else {
        return Err(Error::ParseError(format!(
            "Unknown archive format: {}",
            filename
        )));
    };

    let parent = dest.parent().unwrap_or(dest);
    let scratch = tempfile::Builder::new().prefix(".unpack-").tempdir_in(parent)?;

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(scratch.path())
        .map_err(|e| Error::IoError(format!("Failed to extract {}: {}", archive.display(), e)))?;

    let entries: Vec<_> = fs::read_dir(scratch.path())?
        .filter_map(|e| e.ok())
        .collect();
    let root = if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        entries[0].path()
    } else {
        scratch.path().to_path_buf()
    };

    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        fs::rename(entry.path(), dest.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn fill<W: Write>(builder: &mut tar::Builder<W>, top: &str) {
        for (name, body) in [("meson.build", "project('zck')\n"), ("src/zck.c", "int z;\n")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", top, name), body.as_bytes())
                .unwrap();
        }
    }

    fn make_tarball(path: &Path, top: &str) -> Vec<u8> {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        fill(&mut builder, top);
        builder.into_inner().unwrap().finish().unwrap();
        fs::read(path).unwrap()
    }

    /// Write `path` with the compression its extension names
    fn make_compressed(path: &Path, top: &str) {
        let file = File::create(path).unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        if name.ends_with(".tar.xz") {
            let mut builder = tar::Builder::new(xz2::write::XzEncoder::new(file, 6));
            fill(&mut builder, top);
            builder.into_inner().unwrap().finish().unwrap();
        } else if name.ends_with(".tar.bz2") {
            let mut builder = tar::Builder::new(bzip2::write::BzEncoder::new(
                file,
                bzip2::Compression::default(),
            ));
            fill(&mut builder, top);
            builder.into_inner().unwrap().finish().unwrap();
        } else if name.ends_with(".tar.zst") {
            let mut builder = tar::Builder::new(zstd::stream::write::Encoder::new(file, 0).unwrap());
            fill(&mut builder, top);
            builder.into_inner().unwrap().finish().unwrap();
        } else {
            let mut builder = tar::Builder::new(file);
            fill(&mut builder, top);
            builder.into_inner().unwrap();
        }
    }

    #[test]
    fn test_select_highest_version() {
        let page = r#"
            <a href="zchunk-1.1.9.tar.gz">zchunk-1.1.9.tar.gz</a>
            <a href="zchunk-1.1.10.tar.gz">zchunk-1.1.10.tar.gz</a>
            <a href="zchunk-1.0.4.tar.gz">zchunk-1.0.4.tar.gz</a>
            <a href="zchunk-1.1.10.tar.gz.sha256">checksum</a>
        "#;
        let discovery = IndexPageDiscovery::new(
            "https://example.org/releases/",
            r"zchunk-(?P<version>[0-9.]+[0-9])\.tar\.gz",
        )
        .unwrap();
        let release = discovery.select(page).unwrap();
        assert_eq!(release.url, "https://example.org/releases/zchunk-1.1.10.tar.gz");
        assert_eq!(release.version.unwrap().as_str(), "1.1.10");
        assert_eq!(
            release.checksum,
            ChecksumSource::Sidecar("https://example.org/releases/zchunk-1.1.10.tar.gz.sha256".to_string())
        );
    }

    #[test]
    fn test_select_nothing_is_discovery_error() {
        let discovery =
            IndexPageDiscovery::new("https://example.org/", r"libsolv-([0-9.]+)\.tar\.gz").unwrap();
        let err = discovery.select("<html>nothing here</html>").unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }

    #[test]
    fn test_pattern_must_capture() {
        assert!(IndexPageDiscovery::new("https://example.org/", r"foo\.tar\.gz").is_err());
        assert!(IndexPageDiscovery::new("https://example.org/", r"foo(").is_err());
    }

    #[test]
    fn test_parse_sidecar() {
        let digest = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let sum = parse_sidecar(&format!("{}  zchunk-1.1.10.tar.gz\n", digest)).unwrap();
        assert_eq!(sum.value, digest);
        assert!(parse_sidecar("\n\n").is_err());
    }

    #[test]
    fn test_archive_filename() {
        assert_eq!(archive_filename("https://x.org/a/zck-1.0.tar.gz?raw=1"), "zck-1.0.tar.gz");
        assert_eq!(archive_filename("https://x.org/"), "source.tar.gz");
    }

    #[test]
    fn test_unpack_flattens_single_top_dir() {
        let temp = TempDir::new().unwrap();
        let tarball = temp.path().join("zchunk-1.1.10.tar.gz");
        make_tarball(&tarball, "zchunk-1.1.10");
        let dest = temp.path().join("out");

        unpack_archive(&tarball, &dest).unwrap();
        assert!(dest.join("meson.build").exists());
        assert!(dest.join("src/zck.c").exists());
        assert!(!dest.join("zchunk-1.1.10").exists());
    }

    #[test]
    fn test_unpack_compressed_tarballs() {
        let temp = TempDir::new().unwrap();
        for name in [
            "libsolv-0.7.24.tar.xz",
            "libsolv-0.7.24.tar.bz2",
            "libsolv-0.7.24.tar.zst",
            "libsolv-0.7.24.tar",
        ] {
            let archive = temp.path().join(name);
            make_compressed(&archive, "libsolv-0.7.24");
            let dest = temp.path().join(format!("out-{}", name));

            unpack_archive(&archive, &dest).unwrap();
            assert_eq!(
                fs::read_to_string(dest.join("meson.build")).unwrap(),
                "project('zck')\n",
                "{}",
                name
            );
            assert!(dest.join("src/zck.c").exists(), "{}", name);
        }
    }

    #[test]
    fn test_unpack_corrupt_xz_fails() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.tar.xz");
        fs::write(&archive, b"not xz at all").unwrap();
        let dest = temp.path().join("out");
        assert!(unpack_archive(&archive, &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_unpack_unknown_format() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("source.zip");
        fs::write(&bogus, b"PK").unwrap();
        assert!(unpack_archive(&bogus, &temp.path().join("out")).is_err());
    }

    #[test]
    fn test_fetch_local_release() {
        let temp = TempDir::new().unwrap();
        let tarball = temp.path().join("zchunk-1.1.10.tar.gz");
        let bytes = make_tarball(&tarball, "zchunk-1.1.10");
        let sum = hash_bytes(HashAlgorithm::Sha256, &bytes);
        let url = Url::from_file_path(&tarball).unwrap().to_string();

        let config = RunConfig::under(temp.path());
        let fetcher = DiscoverDownloadVerifyUnpackFetcher::new(StaticRelease::new(url, sum.clone()));
        let dest = temp.path().join("src");

        let tree = fetcher.fetch(&dest, &config).unwrap();
        assert_eq!(tree.revision(), Some(sum.to_prefixed_string().as_str()));
        assert!(dest.join("meson.build").exists());

        // Second fetch is a no-op that yields the same tree
        let again = fetcher.fetch(&dest, &config).unwrap();
        assert_eq!(tree, again);

        // Offline reuse of the unpacked tree
        let offline = config.clone().with_offline(true);
        assert!(fetcher.fetch(&dest, &offline).is_ok());
    }

    #[test]
    fn test_checksum_mismatch_is_fatal_and_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let tarball = temp.path().join("zchunk-1.1.10.tar.gz");
        make_tarball(&tarball, "zchunk-1.1.10");
        let wrong = Checksum::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        let url = Url::from_file_path(&tarball).unwrap().to_string();

        let config = RunConfig::under(temp.path());
        let fetcher = DiscoverDownloadVerifyUnpackFetcher::new(StaticRelease::new(url, wrong));
        let dest = temp.path().join("src");

        let err = fetcher.fetch(&dest, &config).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(err.is_fetch_failure());
        assert!(!dest.exists());
        let archives = config.downloads_tmp.join("archives");
        assert_eq!(fs::read_dir(&archives).unwrap().count(), 0);
    }
}
