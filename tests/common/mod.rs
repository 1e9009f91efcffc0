// tests/common/mod.rs

//! Shared fixtures for the integration tests: upstream trees, a fetcher
//! that counts calls and measures concurrency, a fake build toolchain and a target
//! that records what it was asked to package.

#![allow(dead_code)]

use forgeline::build::{ArtifactTree, BuildCommand, CommandExecutor, SandboxPolicy};
use forgeline::cancel::CancelToken;
use forgeline::fetch::{LocalDirFetcher, SourceFetcher, SourceTree};
use forgeline::package::{PackageMetadata, PackageRef, PackagingSpec};
use forgeline::process::ProcessOutput;
use forgeline::target::{PackageArtifact, TarballDistribution, TargetDistribution};
use forgeline::{Error, Meson, Result, RunConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A temp directory with a run configuration rooted in it
pub fn workspace() -> (TempDir, RunConfig) {
    let temp = TempDir::new().unwrap();
    let config = RunConfig::under(temp.path());
    (temp, config)
}

/// Create `root/upstream/<name>` holding a meson project plus `files`
pub fn upstream(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join("upstream").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("meson.build"), format!("project('{}', 'c')\n", name)).unwrap();
    for (path, content) in files {
        let path = dir.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

pub fn metadata(name: &str, short: &str) -> PackageMetadata {
    PackageMetadata::new(PackageRef::new(name).unwrap(), short).unwrap()
}

pub fn meson() -> Arc<Meson> {
    Arc::new(Meson)
}

pub fn have_git() -> bool {
    which::which("git").is_ok()
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=t", "-c", "user.email=t@example.com"])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Local fetcher that counts fetches and records peak concurrency
#[derive(Debug)]
pub struct CountingFetcher {
    inner: LocalDirFetcher,
    pinned: bool,
    delay: Duration,
    pub fetches: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl CountingFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalDirFetcher::new(path),
            pinned: true,
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Behave like a moving ref: fingerprint only after fetching
    pub fn unpinned(mut self) -> Self {
        self.pinned = false;
        self
    }

    /// Hold each fetch open for `delay` so overlaps become visible
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl SourceFetcher for CountingFetcher {
    fn kind(&self) -> &'static str {
        "dir"
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }

    fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn fetch(&self, dest: &Path, config: &RunConfig) -> Result<SourceTree> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = self.inner.fetch(dest, config);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Fake meson: records every command, installs a small tree
///
/// With `<tool>` the pipeline name, `install` writes `usr/bin/<tool>`,
/// `usr/lib/lib<tool>.so.1` and `usr/include/<tool>.h`, and copies
/// `src/file.txt` from the configured source (when present) to
/// `usr/share/<tool>/file.txt`.
#[derive(Default)]
pub struct FakeMeson {
    pub commands: Mutex<Vec<String>>,
    source: Mutex<Option<PathBuf>>,
    fail_stage: Option<&'static str>,
}

impl FakeMeson {
    pub fn failing(stage: &'static str) -> Self {
        Self {
            fail_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn stages(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, stage: &str) -> usize {
        self.stages().iter().filter(|s| *s == stage).count()
    }
}

impl CommandExecutor for FakeMeson {
    fn execute(
        &self,
        stage: &str,
        command: &BuildCommand,
        _sandbox: Option<&SandboxPolicy>,
        _timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput> {
        cancel.check(stage)?;
        self.commands.lock().unwrap().push(stage.to_string());
        if self.fail_stage == Some(stage) {
            return Ok(ProcessOutput {
                status: Some(1),
                success: false,
                stdout: String::new(),
                stderr: format!("{}: failed", stage),
            });
        }

        if stage == "configure" {
            // meson setup <build> <source> ...
            *self.source.lock().unwrap() = command.args.get(2).map(PathBuf::from);
        }
        if stage == "install" {
            let (_, destdir) = command.env.iter().find(|(k, _)| k == "DESTDIR").unwrap();
            let dest = Path::new(destdir);
            let source = self.source.lock().unwrap().clone().unwrap();
            // <work_root>/<pipeline>/source
            let tool = source
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "tool".to_string());
            for dir in ["usr/bin", "usr/lib", "usr/include"] {
                fs::create_dir_all(dest.join(dir)).unwrap();
            }
            fs::write(dest.join("usr/bin").join(&tool), "#!/bin/sh\n").unwrap();
            fs::write(dest.join("usr/lib").join(format!("lib{}.so.1", tool)), "ELF").unwrap();
            fs::write(dest.join("usr/include").join(format!("{}.h", tool)), "int f();\n").unwrap();
            let extra = source.join("src/file.txt");
            if extra.exists() {
                let share = dest.join("usr/share").join(&tool);
                fs::create_dir_all(&share).unwrap();
                fs::copy(&extra, share.join("file.txt")).unwrap();
            }
        }
        Ok(ProcessOutput {
            status: Some(0),
            success: true,
            stdout: format!("{} ok\n", stage),
            stderr: String::new(),
        })
    }
}

/// Tarball target that counts calls and can be told to fail
#[derive(Debug)]
pub struct RecordingTarget {
    inner: TarballDistribution,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub seen: Mutex<Vec<Vec<String>>>,
}

impl RecordingTarget {
    pub fn new(name: &str) -> Self {
        Self {
            inner: TarballDistribution::new(name).lenient(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        let target = Self::new(name);
        target.fail.store(true, Ordering::SeqCst);
        target
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TargetDistribution for RecordingTarget {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn package(
        &self,
        tree: &ArtifactTree,
        spec: &PackagingSpec,
        output_dir: &Path,
    ) -> Result<Vec<PackageArtifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(tree.files()?);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Packaging {
                target: self.name().to_string(),
                reason: "refusing to package".to_string(),
            });
        }
        self.inner.package(tree, spec, output_dir)
    }
}
