// src/config.rs

//! Invocation-wide configuration
//!
//! A [`RunConfig`] is constructed once per invocation (defaults, then an
//! optional TOML file, then `FORGELINE_*` environment variables, then CLI
//! flags) and is read-only afterwards. It is passed explicitly to every
//! stage; nothing in the engine reads a process global.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration shared by every pipeline of one invocation
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Shared download cache (fetched sources, auxiliary repositories)
    pub downloads_tmp: PathBuf,
    /// Root for per-pipeline working directories
    pub work_root: PathBuf,
    /// Build artifact cache
    pub cache_dir: PathBuf,
    /// Where package artifacts are written
    pub output_dir: PathBuf,
    /// Number of pipelines executed in parallel
    pub jobs: usize,
    /// Parallel jobs passed to the build tool
    pub build_jobs: u32,
    /// Per-stage timeout for fetching
    pub fetch_timeout: Option<Duration>,
    /// Per-stage timeout for configure/build/install
    pub build_timeout: Option<Duration>,
    /// Keep pipeline working directories after completion (for debugging)
    pub keep_workdirs: bool,
    /// Reuse staged install trees when a recipe fingerprint is unchanged
    pub use_build_cache: bool,
    /// Never touch the network; only cached sources are usable
    pub offline: bool,
    /// Abort signal observed by every stage and subprocess of this invocation
    pub cancel: CancelToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        let base = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("forgeline");

        Self {
            downloads_tmp: base.join("downloads"),
            work_root: base.join("work"),
            cache_dir: base.join("builds"),
            output_dir: PathBuf::from("packages"),
            jobs: jobs.min(4),
            build_jobs: jobs as u32,
            fetch_timeout: Some(Duration::from_secs(30 * 60)),
            build_timeout: Some(Duration::from_secs(3 * 3600)),
            keep_workdirs: false,
            use_build_cache: true,
            offline: false,
            cancel: CancelToken::new(),
        }
    }
}

/// On-disk form of the configuration; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    downloads_tmp: Option<PathBuf>,
    work_root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    jobs: Option<usize>,
    build_jobs: Option<u32>,
    /// Seconds; 0 disables the timeout
    fetch_timeout: Option<u64>,
    build_timeout: Option<u64>,
    keep_workdirs: Option<bool>,
    use_build_cache: Option<bool>,
    offline: Option<bool>,
}

impl RunConfig {
    /// A configuration whose directories all live under `root`
    pub fn under(root: &Path) -> Self {
        Self {
            downloads_tmp: root.join("downloads"),
            work_root: root.join("work"),
            cache_dir: root.join("builds"),
            output_dir: root.join("packages"),
            ..Self::default()
        }
    }

    /// Load defaults, the optional config file and the process environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_file {
            config.merge_file(path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from a TOML file
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.merge_toml(&content)
    }

    /// Overlay values from TOML text
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: RunConfigFile = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid run configuration: {}", e)))?;

        if let Some(v) = file.downloads_tmp {
            self.downloads_tmp = v;
        }
        if let Some(v) = file.work_root {
            self.work_root = v;
        }
        if let Some(v) = file.cache_dir {
            self.cache_dir = v;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.jobs {
            self.jobs = v;
        }
        if let Some(v) = file.build_jobs {
            self.build_jobs = v;
        }
        if let Some(v) = file.fetch_timeout {
            self.fetch_timeout = seconds(v);
        }
        if let Some(v) = file.build_timeout {
            self.build_timeout = seconds(v);
        }
        if let Some(v) = file.keep_workdirs {
            self.keep_workdirs = v;
        }
        if let Some(v) = file.use_build_cache {
            self.use_build_cache = v;
        }
        if let Some(v) = file.offline {
            self.offline = v;
        }
        Ok(())
    }

    /// Overlay `FORGELINE_*` variables obtained through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FORGELINE_DOWNLOADS_TMP") {
            self.downloads_tmp = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORGELINE_WORK_ROOT") {
            self.work_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORGELINE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORGELINE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORGELINE_JOBS") {
            self.jobs = parse_env("FORGELINE_JOBS", &v)?;
        }
        if let Some(v) = lookup("FORGELINE_BUILD_JOBS") {
            self.build_jobs = parse_env("FORGELINE_BUILD_JOBS", &v)?;
        }
        if let Some(v) = lookup("FORGELINE_FETCH_TIMEOUT") {
            self.fetch_timeout = seconds(parse_env("FORGELINE_FETCH_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("FORGELINE_BUILD_TIMEOUT") {
            self.build_timeout = seconds(parse_env("FORGELINE_BUILD_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("FORGELINE_OFFLINE") {
            self.offline = parse_bool("FORGELINE_OFFLINE", &v)?;
        }
        Ok(())
    }

    /// Reject configurations that cannot run anything
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::ConfigError("jobs must be at least 1".to_string()));
        }
        if self.build_jobs == 0 {
            return Err(Error::ConfigError("build_jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_build_cache(mut self, enabled: bool) -> Self {
        self.use_build_cache = enabled;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directory holding shared fetched source trees
    pub fn source_cache_dir(&self) -> PathBuf {
        self.downloads_tmp.join("sources")
    }

    /// Directory holding lock files for cache entries
    pub fn lock_dir(&self) -> PathBuf {
        self.downloads_tmp.join("locks")
    }
}

fn seconds(value: u64) -> Option<Duration> {
    if value == 0 {
        None
    } else {
        Some(Duration::from_secs(value))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| Error::ConfigError(format!("{}={}: {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::ConfigError(format!("{}={}: expected a boolean", key, value))),
    }
}
