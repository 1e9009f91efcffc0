// src/runner/mod.rs

//! Running a whole catalogue
//!
//! The runner orders the catalogue's units by dependency into waves. Units
//! in one wave are independent and run in parallel on a pool of
//! `config.jobs` threads. A unit whose dependency failed (or was itself
//! skipped) is skipped instead of run, so one broken upstream only blocks
//! what is built on top of it.

mod report;

pub use report::{RunReport, SkippedPipeline};

use crate::build::CommandExecutor;
use crate::catalogue::{Catalogue, RecipeUnit};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineExecutor, PipelineReport, PipelineState, Stage};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct RepoPipelineRunner<'a> {
    config: &'a RunConfig,
    catalogue: &'a Catalogue,
    only: Vec<String>,
    commands: Option<Arc<dyn CommandExecutor>>,
}

impl<'a> RepoPipelineRunner<'a> {
    pub fn new(config: &'a RunConfig, catalogue: &'a Catalogue) -> Self {
        Self {
            config,
            catalogue,
            only: Vec::new(),
            commands: None,
        }
    }

    /// Restrict the run to `names` and everything they depend on
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = names.into_iter().map(Into::into).collect();
        self
    }

    /// Run build commands through `commands` instead of real processes
    pub fn with_command_executor(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Waves of unit names in execution order
    pub fn plan(&self) -> Result<Vec<Vec<String>>> {
        let graph = self.catalogue.graph()?;
        if self.only.is_empty() {
            return graph.waves();
        }
        for name in &self.only {
            if self.catalogue.get(name).is_none() {
                return Err(Error::NotFound(format!("Recipe {} is not in the catalogue", name)));
            }
        }
        let roots: Vec<&str> = self.only.iter().map(String::as_str).collect();
        graph.closure(&roots).waves()
    }

    /// Run every planned unit
    ///
    /// Only errors that prevent the run from starting (a bad plan, an
    /// unusable cache directory) are returned; pipeline failures are
    /// recorded in the [`RunReport`].
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let waves = self.plan()?;
        let mut executor = PipelineExecutor::new(self.config)?;
        if let Some(commands) = &self.commands {
            executor = executor.with_command_executor(commands.clone());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .thread_name(|i| format!("forgeline-{}", i))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to start worker pool: {}", e)))?;

        let total: usize = waves.iter().map(Vec::len).sum();
        info!(
            "=== Running {} pipeline(s) in {} wave(s) with {} worker(s) ===",
            total,
            waves.len(),
            self.config.jobs
        );

        let mut report = RunReport::default();
        let mut blocked: HashSet<String> = HashSet::new();
        for (index, wave) in waves.into_iter().enumerate() {
            let mut runnable: Vec<Arc<dyn RecipeUnit>> = Vec::new();
            for name in wave {
                report.order.push(name.clone());
                let Some(unit) = self.catalogue.get(&name) else {
                    continue;
                };
                let failed_deps: Vec<String> = unit
                    .depends()
                    .iter()
                    .filter(|d| blocked.contains(*d))
                    .cloned()
                    .collect();
                if failed_deps.is_empty() {
                    runnable.push(unit.clone());
                } else {
                    warn!("Skipping {}: blocked by {}", name, failed_deps.join(", "));
                    blocked.insert(name.clone());
                    report.skipped.push(SkippedPipeline {
                        name,
                        blocked_by: failed_deps,
                    });
                }
            }

            info!("Wave {}: {} pipeline(s)", index + 1, runnable.len());
            let results: Vec<(String, PipelineReport)> = pool.install(|| {
                runnable
                    .par_iter()
                    .map(|unit| (unit.name().to_string(), self.run_unit(&executor, unit.as_ref())))
                    .collect()
            });
            for (unit, result) in results {
                if !result.succeeded() {
                    blocked.insert(unit);
                }
                report.reports.push(result);
            }
        }

        report.duration = started.elapsed();
        info!("{}", report.summary());
        Ok(report)
    }

    fn run_unit(&self, executor: &PipelineExecutor<'_>, unit: &dyn RecipeUnit) -> PipelineReport {
        let pipeline = match unit.pipeline(self.config) {
            Ok(pipeline) => pipeline,
            Err(e) => return setup_failure(unit, e),
        };
        // Work directories and logs are keyed by pipeline name
        if pipeline.name() != unit.name() {
            return setup_failure(
                unit,
                Error::ConfigError(format!(
                    "Recipe {} produced a pipeline named {}",
                    unit.name(),
                    pipeline.name()
                )),
            );
        }
        executor.run(&pipeline)
    }
}

fn setup_failure(unit: &dyn RecipeUnit, error: Error) -> PipelineReport {
    let stage = Stage::of_error(&error, Stage::Fetch);
    warn!("Could not set up pipeline {}: {}", unit.name(), error);
    let mut report = PipelineReport::new(unit.name());
    report.error = Some(error.to_string());
    report.log = format!("=== failed: {} ===\n{}\n", stage, error);
    report.advance(PipelineState::Failed(stage));
    report
}
