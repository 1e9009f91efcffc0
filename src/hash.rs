// src/hash.rs

//! Digests for source verification and recipe fingerprints
//!
//! - **SHA-256 / SHA-512**: checksums published by upstream projects
//! - **XXH128**: fast content addressing for cache shards and tree comparison
//!
//! Checksums are written with an algorithm prefix, e.g. `sha256:abc123...`.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh3::Xxh3;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    /// Non-cryptographic, used only for content addressing
    Xxh128,
}

impl HashAlgorithm {
    /// Length of the hex digest
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
            Self::Xxh128 => 32,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(Error::ParseError(format!(
                "Unsupported checksum algorithm: {} (supported: sha256, sha512, xxh128)",
                s
            ))),
        }
    }
}

/// A digest together with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Parse `algorithm:hex`; a bare hex digest is taken as SHA-256
    pub fn parse(s: &str) -> Result<Self> {
        let (algorithm, value) = match s.trim().split_once(':') {
            Some((algo, value)) => (algo.parse::<HashAlgorithm>()?, value),
            None => (HashAlgorithm::Sha256, s.trim()),
        };

        if value.len() != algorithm.hex_len() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!(
                "Invalid {} digest '{}' (expected {} hex characters)",
                algorithm,
                value,
                algorithm.hex_len()
            )));
        }

        Ok(Self {
            algorithm,
            value: value.to_ascii_lowercase(),
        })
    }

    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
    Xxh128(Box<Xxh3>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
            HasherState::Xxh128(h) => h.update(data),
        }
    }

    /// Feed a length-prefixed field so adjacent fields cannot run together
    pub fn field(&mut self, name: &str, value: &[u8]) {
        self.update(name.as_bytes());
        self.update(&(value.len() as u64).to_le_bytes());
        self.update(value);
    }

    pub fn finalize(self) -> Checksum {
        let value = match self.state {
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
            HasherState::Xxh128(h) => format!("{:032x}", h.digest128()),
        };
        Checksum {
            algorithm: self.algorithm,
            value,
        }
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash a file by streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> Result<Checksum> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Digest of a directory tree's layout and content
///
/// Covers relative paths, file contents, symlink targets and the executable
/// bit, in sorted order. `.git` directories are skipped so a checkout and an
/// unpacked release of the same commit compare equal.
pub fn hash_tree(algorithm: HashAlgorithm, root: &Path) -> Result<Checksum> {
    use std::os::unix::fs::PermissionsExt;

    let mut hasher = Hasher::new(algorithm);
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| Error::IoError(format!("Walking {}: {}", root.display(), e)))?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
            _ => continue,
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            hasher.field("dir", rel.as_bytes());
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            hasher.field("link", rel.as_bytes());
            hasher.field("target", target.to_string_lossy().as_bytes());
        } else {
            let exec = entry.metadata().map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false);
            hasher.field("file", rel.as_bytes());
            hasher.field("exec", &[exec as u8]);
            let content = hash_file(algorithm, entry.path())?;
            hasher.field("content", content.value.as_bytes());
        }
    }

    Ok(hasher.finalize())
}

/// Verify a file against an expected checksum
///
/// A mismatch is always an error; callers must not proceed with the file.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    let actual = hash_file(expected.algorithm, path)?;
    if actual.value == expected.value {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.to_prefixed_string(),
            actual: actual.to_prefixed_string(),
        })
    }
}
