// src/patch/mod.rs

//! Patch-set application
//!
//! A patch set is a directory of unified diffs. Files are applied in the
//! order listed by a `series` file when one exists (quilt style, optional
//! `-pN` per line), otherwise in lexicographic order. A single diff file may
//! also be used as a one-patch set.
//!
//! # Atomicity
//!
//! Nothing touches the source tree until every patch of every set has been
//! applied in memory. Results are then committed file by file; if a write
//! fails half-way the files already written are restored from the originals
//! kept in memory. A conflict anywhere leaves the tree exactly as it was.

mod diff;

pub use diff::{FileDiff, split_unified_diff};

use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm, Hasher};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the ordering file inside a patch-set directory
pub const SERIES_FILE: &str = "series";

/// Default number of leading path components removed (`patch -p1`)
pub const DEFAULT_STRIP: usize = 1;

/// An ordered collection of patch files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    path: PathBuf,
    strip: usize,
}

/// One patch file with its strip level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub path: PathBuf,
    pub strip: usize,
}

impl PatchEntry {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl PatchSet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strip: DEFAULT_STRIP,
        }
    }

    pub fn with_strip(mut self, strip: usize) -> Self {
        self.strip = strip;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strip(&self) -> usize {
        self.strip
    }

    /// Patch files of this set in application order
    pub fn entries(&self) -> Result<Vec<PatchEntry>> {
        if self.path.is_file() {
            return Ok(vec![PatchEntry {
                path: self.path.clone(),
                strip: self.strip,
            }]);
        }
        if !self.path.is_dir() {
            return Err(Error::NotFound(format!(
                "Patch set not found: {}",
                self.path.display()
            )));
        }

        let series = self.path.join(SERIES_FILE);
        if series.is_file() {
            return self.entries_from_series(&series);
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if name.ends_with(".patch") || name.ends_with(".diff") {
                names.push(name);
            } else {
                warn!("Ignoring {} in patch set {}", name, self.path.display());
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| PatchEntry {
                path: self.path.join(name),
                strip: self.strip,
            })
            .collect())
    }

    fn entries_from_series(&self, series: &Path) -> Result<Vec<PatchEntry>> {
        let content = fs::read_to_string(series)?;
        let mut entries = Vec::new();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else { continue };

            let mut strip = self.strip;
            for option in fields {
                strip = option
                    .strip_prefix("-p")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| {
                        Error::ParseError(format!(
                            "{}:{}: unsupported option '{}'",
                            series.display(),
                            lineno + 1,
                            option
                        ))
                    })?;
            }

            let path = self.path.join(name);
            if !path.is_file() {
                return Err(Error::NotFound(format!(
                    "{}:{}: patch {} does not exist",
                    series.display(),
                    lineno + 1,
                    name
                )));
            }
            entries.push(PatchEntry { path, strip });
        }
        Ok(entries)
    }

    /// Feed names, strip levels and contents of every patch into `hasher`
    pub fn digest_into(&self, hasher: &mut Hasher) -> Result<()> {
        for entry in self.entries()? {
            hasher.field("patch", entry.name().as_bytes());
            hasher.field("strip", &(entry.strip as u64).to_le_bytes());
            hasher.field("content", &fs::read(&entry.path)?);
        }
        Ok(())
    }

    pub fn digest(&self) -> Result<Checksum> {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        self.digest_into(&mut hasher)?;
        Ok(hasher.finalize())
    }
}

/// Pending state of one file
#[derive(Debug, Clone)]
enum Staged {
    Write(Vec<u8>),
    Remove,
}

/// Original on-disk state, for restoring after a failed commit
#[derive(Debug, Clone)]
struct Original {
    content: Option<Vec<u8>>,
    mode: Option<u32>,
}

/// Applies patch sets to a source tree, all or nothing
#[derive(Debug)]
pub struct PatchApplier<'a> {
    tree: &'a Path,
    staged: BTreeMap<PathBuf, Staged>,
    originals: BTreeMap<PathBuf, Original>,
    applied: Vec<String>,
}

impl<'a> PatchApplier<'a> {
    pub fn new(tree: &'a Path) -> Self {
        Self {
            tree,
            staged: BTreeMap::new(),
            originals: BTreeMap::new(),
            applied: Vec::new(),
        }
    }

    /// Apply `sets` in order and commit; returns the applied patch names
    pub fn apply(tree: &Path, sets: &[PatchSet]) -> Result<Vec<String>> {
        let mut applier = PatchApplier::new(tree);
        for set in sets {
            applier.stage_set(set)?;
        }
        applier.commit()
    }

    pub fn stage_set(&mut self, set: &PatchSet) -> Result<()> {
        debug!("Staging patch set {}", set.path().display());
        for entry in set.entries()? {
            self.stage_patch(&entry)?;
        }
        Ok(())
    }

    fn stage_patch(&mut self, entry: &PatchEntry) -> Result<()> {
        let name = entry.name();
        let text = fs::read(&entry.path).map_err(|e| Error::PatchConflict {
            patch: name.clone(),
            file: entry.path.display().to_string(),
            hunk: None,
            reason: format!("unreadable patch: {}", e),
        })?;

        let diffs = split_unified_diff(&text).map_err(|reason| Error::PatchConflict {
            patch: name.clone(),
            file: "-".to_string(),
            hunk: None,
            reason,
        })?;
        if diffs.is_empty() {
            return Err(Error::PatchConflict {
                patch: name,
                file: "-".to_string(),
                hunk: None,
                reason: "no file changes found".to_string(),
            });
        }

        for file_diff in &diffs {
            self.stage_file_diff(&name, file_diff, entry.strip)?;
        }
        info!("Applied patch: {}", name);
        self.applied.push(name);
        Ok(())
    }

    fn stage_file_diff(&mut self, patch: &str, diff: &FileDiff, strip: usize) -> Result<()> {
        let conflict = |file: &str, hunk: Option<usize>, reason: String| Error::PatchConflict {
            patch: patch.to_string(),
            file: file.to_string(),
            hunk,
            reason,
        };

        let old = diff
            .old_path
            .as_deref()
            .map(|p| strip_components(p, strip).ok_or_else(|| conflict(p, None, format!("cannot strip {} components", strip))))
            .transpose()?;
        let new = diff
            .new_path
            .as_deref()
            .map(|p| strip_components(p, strip).ok_or_else(|| conflict(p, None, format!("cannot strip {} components", strip))))
            .transpose()?;

        let (source, target) = match (old, new) {
            (None, None) => return Err(conflict("/dev/null", None, "both sides are /dev/null".to_string())),
            (None, Some(new)) => (None, new),
            (Some(old), None) => (Some(old.clone()), old),
            (Some(old), Some(new)) => {
                if self.exists(&old) || old == new {
                    (Some(old), new)
                } else {
                    (Some(new.clone()), new)
                }
            }
        };
        let target_name = target.display().to_string();

        let base = match &source {
            Some(path) => {
                let file = path.display().to_string();
                self.current(path)
                    .map_err(|e| conflict(&file, None, format!("unreadable: {}", e)))?
                    .ok_or_else(|| conflict(&file, None, "file not found".to_string()))?
            }
            None => {
                if self.exists(&target) {
                    return Err(conflict(&target_name, None, "file to be created already exists".to_string()));
                }
                Vec::new()
            }
        };

        let parsed = diffy::Patch::from_bytes(&diff.text)
            .map_err(|e| conflict(&target_name, None, format!("malformed diff: {}", e)))?;
        let patched = diffy::apply_bytes(&base, &parsed).map_err(|e| {
            let reason = e.to_string();
            conflict(&target_name, hunk_number(&reason), reason)
        })?;

        if diff.new_path.is_none() {
            if !patched.is_empty() {
                return Err(conflict(&target_name, None, "deleted file still has content".to_string()));
            }
            self.stage(target, Staged::Remove)?;
            return Ok(());
        }

        if let Some(source) = source
            && source != target
        {
            self.stage(source, Staged::Remove)?;
        }
        self.stage(target, Staged::Write(patched))
    }

    fn exists(&self, rel: &Path) -> bool {
        match self.staged.get(rel) {
            Some(Staged::Write(_)) => true,
            Some(Staged::Remove) => false,
            None => self.tree.join(rel).is_file(),
        }
    }

    /// Staged content, or disk content, of a file; `None` when absent
    fn current(&self, rel: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match self.staged.get(rel) {
            Some(Staged::Write(content)) => Ok(Some(content.clone())),
            Some(Staged::Remove) => Ok(None),
            None => {
                let path = self.tree.join(rel);
                if !path.is_file() {
                    return Ok(None);
                }
                fs::read(&path).map(Some)
            }
        }
    }

    fn stage(&mut self, rel: PathBuf, state: Staged) -> Result<()> {
        if !self.originals.contains_key(&rel) {
            let path = self.tree.join(&rel);
            let original = if path.is_file() {
                Original {
                    content: Some(fs::read(&path)?),
                    mode: Some(fs::metadata(&path)?.permissions().mode()),
                }
            } else {
                Original {
                    content: None,
                    mode: None,
                }
            };
            self.originals.insert(rel.clone(), original);
        }
        self.staged.insert(rel, state);
        Ok(())
    }

    /// Write every staged change to disk, restoring originals on failure
    pub fn commit(self) -> Result<Vec<String>> {
        let mut written: Vec<&PathBuf> = Vec::new();
        for (rel, state) in &self.staged {
            if let Err(e) = self.write_one(rel, state) {
                warn!("Commit of patched {} failed, restoring tree: {}", rel.display(), e);
                for done in written.iter().chain(std::iter::once(&rel)) {
                    self.restore(done);
                }
                return Err(e);
            }
            written.push(rel);
        }
        Ok(self.applied)
    }

    fn write_one(&self, rel: &Path, state: &Staged) -> Result<()> {
        let path = self.tree.join(rel);
        match state {
            Staged::Remove => match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
            Staged::Write(content) => {
                let parent = path.parent().unwrap_or(self.tree);
                fs::create_dir_all(parent)?;
                let mode = self
                    .originals
                    .get(rel)
                    .and_then(|o| o.mode)
                    .unwrap_or(0o644);
                let mut temp = tempfile::NamedTempFile::new_in(parent)?;
                std::io::Write::write_all(&mut temp, content)?;
                fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
                temp.persist(&path)
                    .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
                Ok(())
            }
        }
    }

    fn restore(&self, rel: &Path) {
        let path = self.tree.join(rel);
        let Some(original) = self.originals.get(rel) else { return };
        let result = match &original.content {
            Some(bytes) => fs::write(&path, bytes).and_then(|_| match original.mode {
                Some(mode) => fs::set_permissions(&path, fs::Permissions::from_mode(mode)),
                None => Ok(()),
            }),
            None => match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!("Failed to restore {}: {}", path.display(), e);
        }
    }
}

/// Drop `n` leading components; `None` if the path is too short
fn strip_components(path: &str, n: usize) -> Option<PathBuf> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.len() <= n || parts.iter().any(|p| *p == "..") {
        return None;
    }
    Some(parts[n..].iter().collect())
}

/// Hunk index from a diffy apply error ("error applying hunk #3")
fn hunk_number(message: &str) -> Option<usize> {
    message
        .rsplit('#')
        .next()
        .and_then(|n| n.trim().parse().ok())
}
