// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{CacheCommands, Cli, Commands};
use forgeline::{BuildCache, Catalogue, RepoPipelineRunner, RunConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let mut config = RunConfig::load(cli.config.as_deref())?;
    if let Some(jobs) = cli.jobs {
        config = config.with_jobs(jobs);
        config.validate()?;
    }

    // First Ctrl-C cancels in-flight pipelines; they stop at their next poll
    signal_hook::flag::register(signal_hook::consts::SIGINT, config.cancel.flag())
        .context("Failed to install SIGINT handler")?;

    match cli.command {
        Commands::Run {
            catalogue,
            only,
            no_cache,
            offline,
            keep_workdirs,
            output,
        } => {
            let config = run_overrides(config, no_cache, offline, keep_workdirs, output);
            cmd_run(&config, &catalogue, only)
        }
        Commands::Plan { catalogue, only } => cmd_plan(&config, &catalogue, only),
        Commands::Fetch { catalogue, only } => cmd_fetch(&config, &catalogue, only),
        Commands::Inspect { dir } => cmd_inspect(&dir),
        Commands::Cache(CacheCommands::Stats) => cmd_cache_stats(&config),
        Commands::Cache(CacheCommands::Clear) => cmd_cache_clear(&config),
    }
}

/// Apply `run` flags on top of the loaded configuration
///
/// Flags add to the file's settings; leaving one out never re-enables the
/// cache or the network for a config that turned them off.
fn run_overrides(
    config: RunConfig,
    no_cache: bool,
    offline: bool,
    keep_workdirs: bool,
    output: Option<PathBuf>,
) -> RunConfig {
    let offline = offline || config.offline;
    let use_cache = config.use_build_cache && !no_cache;
    let mut config = config.with_build_cache(use_cache).with_offline(offline);
    config.keep_workdirs |= keep_workdirs;
    if let Some(output) = output {
        config.output_dir = output;
    }
    config
}

fn load_catalogue(path: &Path) -> Result<Catalogue> {
    Catalogue::load(path).with_context(|| format!("Failed to load catalogue {}", path.display()))
}

fn cmd_run(config: &RunConfig, catalogue: &Path, only: Vec<String>) -> Result<ExitCode> {
    let catalogue = load_catalogue(catalogue)?;
    let report = RepoPipelineRunner::new(config, &catalogue).only(only).run()?;

    println!();
    for pipeline in &report.reports {
        println!("  {}", pipeline.summary());
        for artifact in pipeline.artifacts() {
            println!("      {}", artifact.path.display());
        }
    }
    for skipped in &report.skipped {
        println!(
            "  {}: skipped (blocked by {})",
            skipped.name,
            skipped.blocked_by.join(", ")
        );
    }
    println!("\n{}", report.summary());

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Build logs: {}", config.output_dir.join("logs").display());
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_plan(config: &RunConfig, catalogue: &Path, only: Vec<String>) -> Result<ExitCode> {
    let catalogue = load_catalogue(catalogue)?;
    let waves = RepoPipelineRunner::new(config, &catalogue).only(only).plan()?;
    for (index, wave) in waves.iter().enumerate() {
        println!("Wave {}: {}", index + 1, wave.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_fetch(config: &RunConfig, catalogue: &Path, only: Vec<String>) -> Result<ExitCode> {
    let catalogue = load_catalogue(catalogue)?;
    let waves = RepoPipelineRunner::new(config, &catalogue).only(only).plan()?;
    let sources = forgeline::fetch::SourceCache::new(config);

    let mut failures = 0;
    for name in waves.iter().flatten() {
        let Some(unit) = catalogue.get(name) else {
            continue;
        };
        let result = unit.pipeline(config).and_then(|pipeline| {
            sources.warm(pipeline.recipe().fetcher(), config)
        });
        match result {
            Ok(tree) => println!(
                "  [OK] {} {}",
                name,
                tree.revision().unwrap_or("(unversioned)")
            ),
            Err(e) => {
                warn!("Fetching {} failed: {}", name, e);
                println!("  [FAILED] {}: {}", name, e);
                failures += 1;
            }
        }
    }
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_inspect(dir: &Path) -> Result<ExitCode> {
    let manifests = forgeline::target::inspect(dir)
        .with_context(|| format!("Failed to read packages in {}", dir.display()))?;
    if manifests.is_empty() {
        println!("No packages in {}", dir.display());
    }
    for manifest in manifests {
        println!(
            "{} {} [{}] {} file(s)",
            manifest.name,
            manifest.version.as_deref().unwrap_or("-"),
            manifest.section,
            manifest.files.len()
        );
        println!("    {}", manifest.description_short);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_cache_stats(config: &RunConfig) -> Result<ExitCode> {
    let cache = BuildCache::for_run(config)?;
    let stats = cache.stats()?;
    println!("Build cache: {}", cache.root().display());
    println!("  Entries: {}", stats.entry_count);
    println!("  Size: {:.1} MiB", stats.total_size as f64 / (1024.0 * 1024.0));
    if let Some(newest) = stats.newest {
        println!("  Newest: {}", newest.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_cache_clear(config: &RunConfig) -> Result<ExitCode> {
    let cache = BuildCache::for_run(config)?;
    let removed = cache.clear()?;
    info!("Cleared build cache {}", cache.root().display());
    println!("Removed {} cached build(s)", removed);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_overrides_keep_config_settings() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path()).with_offline(true);
        let config = run_overrides(config, false, false, false, None);
        assert!(config.offline);
        assert!(config.use_build_cache);
    }

    #[test]
    fn test_run_overrides_apply_flags() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path());
        let output = temp.path().join("dist");
        let config = run_overrides(config, true, true, true, Some(output.clone()));
        assert!(config.offline);
        assert!(!config.use_build_cache);
        assert!(config.keep_workdirs);
        assert_eq!(config.output_dir, output);
    }
}
