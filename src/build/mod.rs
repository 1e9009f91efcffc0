// src/build/mod.rs

//! Build-system abstraction
//!
//! A [`BuildSystemAdapter`] turns a fetched, patched source tree plus an
//! untyped [`BuildOptions`] map into concrete configure, build and install
//! commands for one build-tool family. The translation is pure; running the
//! commands goes through a [`CommandExecutor`] so the same adapter works
//! against real processes and against a recording fake.
//!
//! Adapters:
//! - [`CMake`]: `-DKEY=VALUE` cache variables
//! - [`Meson`]: `-Dkey=value` project options
//! - [`AutoTools`]: `--with-*`/`--enable-*` switches, optionally driven by
//!   kati instead of make

mod autotools;
mod cmake;
mod exec;
mod meson;
mod options;
mod sandbox;

pub use autotools::AutoTools;
pub use cmake::CMake;
pub use exec::{BuildLog, CommandExecutor, ProcessExecutor, StageRunner};
pub use meson::Meson;
pub use options::{BuildOptions, OptionValue};
pub use sandbox::{SandboxPolicy, isolation_available};

use crate::error::{Error, Result};
use crate::fetch::SourceTree;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

/// Install prefix used by every adapter
pub const INSTALL_PREFIX: &str = "/usr";

/// One command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.env {
            out.push_str(&format!("{}={} ", key, quote(value)));
        }
        out.push_str(&quote(&self.program));
        for arg in &self.args {
            out.push(' ');
            out.push_str(&quote(arg));
        }
        out
    }
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Parameters for configuring one source tree
#[derive(Debug, Clone)]
pub struct ConfigureRequest<'a> {
    pub source: &'a SourceTree,
    /// Nested project root inside the source tree
    pub subdir: Option<&'a Path>,
    pub build_dir: PathBuf,
    pub options: &'a BuildOptions,
    /// Parallel jobs for the build tool
    pub jobs: u32,
    /// Isolation for build and install; configure always runs unrestricted
    pub sandbox: Option<&'a SandboxPolicy>,
}

/// A configured build, ready for `build` and `install`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub adapter: String,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Native arguments translated from the option map
    pub configure_args: Vec<String>,
    pub configure: Vec<BuildCommand>,
    pub jobs: u32,
    pub sandbox: Option<SandboxPolicy>,
    /// Option keys the adapter ignored, with the reason
    pub warnings: Vec<String>,
}

impl BuildPlan {
    /// The sandbox policy, if one is actually enforced
    pub fn active_sandbox(&self) -> Option<&SandboxPolicy> {
        self.sandbox.as_ref().filter(|p| p.is_active())
    }
}

/// A directory tree produced by a build stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTree {
    root: PathBuf,
}

impl ArtifactTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file and symlink below the root, as sorted `/`-separated paths
    pub fn files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| Error::IoError(e.to_string()))?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
        files.sort();
        Ok(files)
    }
}

/// Native option arguments plus the keys that could not be translated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedOptions {
    pub args: Vec<String>,
    pub warnings: Vec<String>,
}

/// Translator from abstract options to one build tool's invocation
pub trait BuildSystemAdapter: Send + Sync + fmt::Debug {
    /// Stable adapter name, part of every recipe fingerprint
    fn name(&self) -> &'static str;

    /// Map the option table onto native arguments
    ///
    /// Keys the adapter cannot express land in `warnings`; returning an
    /// error instead makes them fatal.
    fn translate_options(&self, options: &BuildOptions) -> Result<TranslatedOptions>;

    fn configure_commands(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        args: &[String],
    ) -> Vec<BuildCommand>;

    fn build_commands(&self, plan: &BuildPlan) -> Vec<BuildCommand>;

    fn install_commands(&self, plan: &BuildPlan, staging_root: &Path) -> Vec<BuildCommand>;

    /// Produce the plan without running anything
    fn plan(&self, request: &ConfigureRequest<'_>) -> Result<BuildPlan> {
        let source_dir = resolve_subdir(request.source.root(), request.subdir)?;
        let translated = self.translate_options(request.options)?;
        let configure =
            self.configure_commands(&source_dir, &request.build_dir, &translated.args);

        Ok(BuildPlan {
            adapter: self.name().to_string(),
            source_dir,
            build_dir: request.build_dir.clone(),
            configure_args: translated.args,
            configure,
            jobs: request.jobs.max(1),
            sandbox: request.sandbox.cloned(),
            warnings: translated.warnings,
        })
    }

    fn configure(
        &self,
        request: &ConfigureRequest<'_>,
        runner: &mut StageRunner<'_>,
    ) -> Result<BuildPlan> {
        let plan = self.plan(request)?;
        for warning in &plan.warnings {
            warn!("{}: {}", self.name(), warning);
        }
        fs::create_dir_all(&plan.build_dir)?;
        runner.run("configure", &plan.configure, None)?;
        Ok(plan)
    }

    fn build(&self, plan: &BuildPlan, runner: &mut StageRunner<'_>) -> Result<ArtifactTree> {
        runner.run("build", &self.build_commands(plan), plan.active_sandbox())?;
        Ok(ArtifactTree::new(&plan.build_dir))
    }

    fn install(
        &self,
        plan: &BuildPlan,
        staging_root: &Path,
        runner: &mut StageRunner<'_>,
    ) -> Result<()> {
        fs::create_dir_all(staging_root)?;
        runner.run(
            "install",
            &self.install_commands(plan, staging_root),
            plan.active_sandbox(),
        )
    }
}

/// Look up a built-in adapter by name
pub fn adapter_for(name: &str) -> Result<Arc<dyn BuildSystemAdapter>> {
    match name.to_ascii_lowercase().as_str() {
        "cmake" => Ok(Arc::new(CMake)),
        "meson" => Ok(Arc::new(Meson)),
        "autotools" => Ok(Arc::new(AutoTools::new())),
        "autotools+kati" | "kati" => Ok(Arc::new(AutoTools::with_kati())),
        other => Err(Error::ConfigError(format!(
            "Unknown build system '{}' (expected cmake, meson, autotools or autotools+kati)",
            other
        ))),
    }
}

/// Join a relative subdir onto the source root, refusing escapes
pub fn resolve_subdir(root: &Path, subdir: Option<&Path>) -> Result<PathBuf> {
    let Some(subdir) = subdir else {
        return Ok(root.to_path_buf());
    };
    if subdir
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::ConfigError(format!(
            "subdir {} must be a relative path inside the source tree",
            subdir.display()
        )));
    }
    let dir = root.join(subdir);
    if !dir.is_dir() {
        return Err(Error::Build {
            stage: "configure".to_string(),
            status: None,
            output: format!("subdir {} does not exist in the source tree", subdir.display()),
        });
    }
    Ok(dir)
}

/// `DESTDIR` environment pair for install commands
pub(crate) fn destdir(staging_root: &Path) -> (String, String) {
    (
        "DESTDIR".to_string(),
        staging_root.to_string_lossy().into_owned(),
    )
}
