// src/pipeline/state.rs

//! Pipeline state machine
//!
//! ```text
//! Pending -> Fetched -> Patched -> Built -> Packaged -> Succeeded
//!    \          \          \         \         \
//!     +----------+----------+---------+---------+--> Failed(stage)
//! ```
//!
//! A build-cache hit jumps from `Pending` or `Fetched` straight to `Built`.

use crate::error::Error;
use serde::Serialize;
use std::fmt;

/// Stage a pipeline failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Patch,
    Build,
    Package,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::Build => "build",
            Stage::Package => "package",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Attribute `error` to a stage
    ///
    /// Errors that carry no stage of their own (I/O, parse) are charged to
    /// `current`, the stage that was running when they happened.
    pub fn of_error(error: &Error, current: Stage) -> Stage {
        match error {
            Error::Cancelled(_) => Stage::Cancelled,
            e if e.is_fetch_failure() => Stage::Fetch,
            Error::PatchConflict { .. } => Stage::Patch,
            Error::Timeout { stage, .. } if stage == "fetch" => Stage::Fetch,
            Error::Build { .. } | Error::Timeout { .. } => Stage::Build,
            Error::Packaging { .. } => Stage::Package,
            _ => current,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Fetched,
    Patched,
    Built,
    Packaged,
    Succeeded,
    Failed(Stage),
}

impl PipelineState {
    fn rank(&self) -> u8 {
        match self {
            PipelineState::Pending => 0,
            PipelineState::Fetched => 1,
            PipelineState::Patched => 2,
            PipelineState::Built => 3,
            PipelineState::Packaged => 4,
            PipelineState::Succeeded | PipelineState::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// States only move forward. Skipping ahead is allowed only into `Built`
    /// (cache hit) and into `Failed`.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PipelineState::Failed(_) => true,
            PipelineState::Built => self.rank() < next.rank(),
            PipelineState::Succeeded => *self == PipelineState::Packaged,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pending => f.write_str("pending"),
            PipelineState::Fetched => f.write_str("fetched"),
            PipelineState::Patched => f.write_str("patched"),
            PipelineState::Built => f.write_str("built"),
            PipelineState::Packaged => f.write_str("packaged"),
            PipelineState::Succeeded => f.write_str("succeeded"),
            PipelineState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}
