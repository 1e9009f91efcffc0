// src/cli.rs
//! CLI definitions for forgeline
//!
//! Command implementations live in `main.rs`; everything they do goes
//! through the library.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forgeline")]
#[command(version)]
#[command(about = "Fetch, patch, build and package upstream projects", long_about = None)]
pub struct Cli {
    /// Run configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of pipelines run in parallel
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and package every recipe of a catalogue
    Run {
        /// Catalogue file
        #[arg(default_value = "catalogue.toml")]
        catalogue: PathBuf,

        /// Only these recipes and what they depend on
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Ignore the build cache
        #[arg(long)]
        no_cache: bool,

        /// Use cached sources only
        #[arg(long)]
        offline: bool,

        /// Keep pipeline working directories
        #[arg(long)]
        keep_workdirs: bool,

        /// Where packages are written
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the execution waves without running anything
    Plan {
        #[arg(default_value = "catalogue.toml")]
        catalogue: PathBuf,

        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// Populate the source cache for recipes without building
    Fetch {
        #[arg(default_value = "catalogue.toml")]
        catalogue: PathBuf,

        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// List packages written to an output directory
    Inspect {
        /// Target output directory (`<output>/<target>`)
        dir: PathBuf,
    },

    /// Build cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache size and entry count
    Stats,

    /// Remove every cached build
    Clear,
}
