// src/error.rs

//! Error types for the build-pipeline engine
//!
//! Every failure is scoped to the pipeline that produced it. The variants
//! mirror the stages of a pipeline so the runner can report which stage
//! failed without inspecting messages.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// Network, refspec or transport failure while acquiring sources
    #[error("Failed to fetch {source_ref}: {reason}")]
    Fetch { source_ref: String, reason: String },

    /// No distributable artifact matched during release discovery
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Downloaded content did not match the expected digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A patch did not apply; the tree was left untouched
    #[error("{}", format_patch_conflict(patch, file, *hunk, reason))]
    PatchConflict {
        patch: String,
        file: String,
        hunk: Option<usize>,
        reason: String,
    },

    /// Configure, build or install subprocess failed
    #[error("{stage} failed (exit status {status:?})\n{output}")]
    Build {
        stage: String,
        status: Option<i32>,
        output: String,
    },

    /// A stage exceeded its time budget
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: String, after: Duration },

    /// Target-specific packaging failure
    #[error("Packaging for {target} failed: {reason}")]
    Packaging { target: String, reason: String },

    /// The global abort signal was raised
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Resolution error: {0}")]
    ResolutionError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

fn format_patch_conflict(patch: &str, file: &str, hunk: Option<usize>, reason: &str) -> String {
    match hunk {
        Some(h) => format!("Patch {} conflicts in {} at hunk #{}: {}", patch, file, h, reason),
        None => format!("Patch {} conflicts in {}: {}", patch, file, reason),
    }
}

impl Error {
    /// Whether this error belongs to the fetch stage taxonomy
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::Fetch { .. } | Error::Discovery(_) | Error::ChecksumMismatch { .. }
        )
    }

    /// Whether this error was caused by the abort signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
