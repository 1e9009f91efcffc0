// src/pipeline/executor.rs

//! Driving one pipeline from fetch to packages
//!
//! Each pipeline works in `work_root/<name>/`:
//!
//! ```text
//! source/   private copy of the fetched tree, patched in place
//! build/    out-of-tree build directory
//! stage/    DESTDIR of the install step, later packaged per target
//! ```
//!
//! The build cache is consulted twice: before fetching when the recipe's
//! source is pinned, and right after fetching otherwise (the resolved
//! revision is part of the fingerprint). A hit restores `stage/` and skips
//! patch and build.

use super::{BuildPipeline, PipelineReport, PipelineState, Stage, TargetReport};
use crate::build::{
    ArtifactTree, BuildLog, CommandExecutor, ConfigureRequest, ProcessExecutor, StageRunner,
};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::fetch::{SourceCache, SourceTree};
use crate::patch::PatchApplier;
use crate::recipe::{BuildCache, BuildRecipe, Fingerprint};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs pipelines against one [`RunConfig`]
///
/// Shareable between threads: the source cache and build cache lock per
/// entry, and every pipeline gets its own working directory.
pub struct PipelineExecutor<'a> {
    config: &'a RunConfig,
    sources: SourceCache,
    cache: Option<BuildCache>,
    commands: Arc<dyn CommandExecutor>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(config: &'a RunConfig) -> Result<Self> {
        let cache = if config.use_build_cache {
            Some(BuildCache::for_run(config)?)
        } else {
            None
        };
        Ok(Self {
            config,
            sources: SourceCache::new(config),
            cache,
            commands: Arc::new(ProcessExecutor),
        })
    }

    /// Run build commands through `commands` instead of real processes
    pub fn with_command_executor(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = commands;
        self
    }

    pub fn config(&self) -> &RunConfig {
        self.config
    }

    pub fn sources(&self) -> &SourceCache {
        &self.sources
    }

    pub fn build_cache(&self) -> Option<&BuildCache> {
        self.cache.as_ref()
    }

    /// Run `pipeline` to a terminal state
    ///
    /// Never returns an error: failures end up in the report as
    /// `Failed(stage)` so sibling pipelines keep running.
    pub fn run(&self, pipeline: &BuildPipeline) -> PipelineReport {
        let started = Instant::now();
        let name = pipeline.name();
        let mut report = PipelineReport::new(name);
        let mut log = BuildLog::new();
        let mut stage = Stage::Fetch;

        info!("Starting pipeline {}", name);
        let workdir = self.config.work_root.join(name);
        if let Err(e) = self.drive(pipeline, &workdir, &mut report, &mut log, &mut stage) {
            let failed = Stage::of_error(&e, stage);
            warn!("Pipeline {} failed in {}: {}", name, failed, e);
            log.line(&format!("=== failed: {} ===", failed));
            log.line(&e.to_string());
            report.error = Some(e.to_string());
            report.advance(PipelineState::Failed(failed));
        }

        report.log = log.into_string();
        self.write_log(name, &report.log);
        if !self.config.keep_workdirs
            && workdir.exists()
            && let Err(e) = fs::remove_dir_all(&workdir)
        {
            warn!("Failed to remove {}: {}", workdir.display(), e);
        }
        report.duration = started.elapsed();
        info!("{}", report.summary());
        report
    }

    fn drive(
        &self,
        pipeline: &BuildPipeline,
        workdir: &Path,
        report: &mut PipelineReport,
        log: &mut BuildLog,
        stage: &mut Stage,
    ) -> Result<()> {
        pipeline.validate()?;
        let recipe = pipeline.recipe();
        let cancel = &self.config.cancel;

        cancel.check("fetch")?;
        if workdir.exists() {
            fs::remove_dir_all(workdir)?;
        }
        fs::create_dir_all(workdir)?;
        let source_dir = workdir.join("source");
        let build_dir = workdir.join("build");
        let staging = workdir.join("stage");

        let mut fingerprint = recipe.pinned_fingerprint()?;
        let mut cached = match &fingerprint {
            Some(fp) => self.restore_cached(fp, &staging, log),
            None => false,
        };

        if !cached {
            log.header("fetch", None);
            log.line(&format!("source: {}", recipe.fetcher().identity()));
            let tree = self
                .sources
                .checkout(recipe.fetcher(), &source_dir, self.config)?;
            if let Some(revision) = tree.revision() {
                log.line(&format!("revision: {}", revision));
            }
            report.revision = tree.revision().map(str::to_string);
            report.advance(PipelineState::Fetched);

            if fingerprint.is_none() {
                let fp = recipe.fingerprint(tree.revision())?;
                cached = self.restore_cached(&fp, &staging, log);
                fingerprint = Some(fp);
            }

            if !cached {
                *stage = Stage::Patch;
                cancel.check("patch")?;
                log.header("patch", None);
                let applied = PatchApplier::apply(tree.root(), recipe.patches())?;
                for patch in &applied {
                    log.line(&format!("applied {}", patch));
                }
                report.patches_applied = applied;
                report.advance(PipelineState::Patched);

                *stage = Stage::Build;
                self.build(recipe, &tree, &build_dir, &staging, log)?;
                if let (Some(cache), Some(fp)) = (&self.cache, &fingerprint)
                    && let Err(e) = cache.put(fp, pipeline.name(), report.revision.as_deref(), &staging)
                {
                    warn!("Could not cache build of {}: {}", pipeline.name(), e);
                }
            }
        }

        report.cache_hit = cached;
        report.fingerprint = fingerprint;
        report.advance(PipelineState::Built);

        *stage = Stage::Package;
        self.package(pipeline, &staging, report, log)
    }

    /// Restore a cached stage tree; any cache problem counts as a miss
    fn restore_cached(&self, fp: &Fingerprint, staging: &Path, log: &mut BuildLog) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let entry = match cache.get(fp) {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!("Build cache lookup for {} failed: {}", fp.short(), e);
                return false;
            }
        };
        match cache.restore(&entry, staging) {
            Ok(()) => {
                info!("Build cache hit: {} ({})", entry.label, fp.short());
                log.line(&format!("=== build (cached {}) ===", fp.short()));
                true
            }
            Err(e) => {
                warn!("Failed to restore cached build {}: {}", fp.short(), e);
                false
            }
        }
    }

    fn build(
        &self,
        recipe: &BuildRecipe,
        tree: &SourceTree,
        build_dir: &Path,
        staging: &Path,
        log: &mut BuildLog,
    ) -> Result<()> {
        let adapter = recipe.adapter();
        let mut runner = StageRunner::new(self.commands.as_ref(), self.config);
        let request = ConfigureRequest {
            source: tree,
            subdir: recipe.subdir(),
            build_dir: build_dir.to_path_buf(),
            options: recipe.options(),
            jobs: self.config.build_jobs,
            sandbox: recipe.sandbox(),
        };

        let result = adapter.configure(&request, &mut runner).and_then(|plan| {
            adapter.build(&plan, &mut runner)?;
            adapter.install(&plan, staging, &mut runner)
        });
        log.append(runner.into_log());
        result?;

        if ArtifactTree::new(staging).files()?.is_empty() {
            warn!("{} installed no files", adapter.name());
        }
        Ok(())
    }

    /// Package the staged tree once per target
    ///
    /// Targets are independent: a failing target is recorded and the rest
    /// still run. Cancellation stops packaging immediately.
    fn package(
        &self,
        pipeline: &BuildPipeline,
        staging: &Path,
        report: &mut PipelineReport,
        log: &mut BuildLog,
    ) -> Result<()> {
        let tree = ArtifactTree::new(staging);
        let mut failed = Vec::new();

        for target in pipeline.targets() {
            let name = target.distribution.name().to_string();
            log.header(&format!("package {}", name), None);
            let result = self.config.cancel.check("package").and_then(|_| {
                target
                    .distribution
                    .package(&tree, &target.packaging, &self.config.output_dir)
            });

            match result {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        log.line(&format!("{} -> {}", artifact.package, artifact.path.display()));
                    }
                    report.targets.push(TargetReport {
                        target: name,
                        artifacts,
                        error: None,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("Packaging {} for {} failed: {}", pipeline.name(), name, e);
                    log.line(&e.to_string());
                    report.targets.push(TargetReport {
                        target: name.clone(),
                        artifacts: Vec::new(),
                        error: Some(e.to_string()),
                    });
                    failed.push(name);
                }
            }
        }

        report.advance(PipelineState::Packaged);
        if !failed.is_empty() {
            return Err(Error::Packaging {
                target: failed.join(", "),
                reason: format!(
                    "{} of {} target(s) failed",
                    failed.len(),
                    pipeline.targets().len()
                ),
            });
        }
        report.advance(PipelineState::Succeeded);
        Ok(())
    }

    fn write_log(&self, name: &str, text: &str) {
        let dir = self.config.output_dir.join("logs");
        let path = dir.join(format!("{}.log", name));
        match fs::create_dir_all(&dir).and_then(|_| fs::write(&path, text)) {
            Ok(()) => debug!("Wrote build log {}", path.display()),
            Err(e) => warn!("Failed to write build log {}: {}", path.display(), e),
        }
    }
}
