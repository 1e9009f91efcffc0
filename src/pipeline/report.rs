// src/pipeline/report.rs

//! Results of one pipeline run

use super::{PipelineState, Stage};
use crate::recipe::Fingerprint;
use crate::target::PackageArtifact;
use std::time::Duration;
use tracing::warn;

/// Packaging result for one target
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: String,
    pub artifacts: Vec<PackageArtifact>,
    /// Set when packaging for this target failed
    pub error: Option<String>,
}

impl TargetReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub name: String,
    pub state: PipelineState,
    /// Every state the pipeline passed through, in order
    pub history: Vec<PipelineState>,
    pub fingerprint: Option<Fingerprint>,
    /// Resolved source revision, when a fetch happened
    pub revision: Option<String>,
    /// The staged tree came from the build cache
    pub cache_hit: bool,
    pub patches_applied: Vec<String>,
    pub targets: Vec<TargetReport>,
    pub error: Option<String>,
    /// Stage headers, commands and tool output
    pub log: String,
    pub duration: Duration,
}

impl PipelineReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PipelineState::Pending,
            history: vec![PipelineState::Pending],
            fingerprint: None,
            revision: None,
            cache_hit: false,
            patches_applied: Vec::new(),
            targets: Vec::new(),
            error: None,
            log: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Move to `next`; illegal transitions are ignored and logged
    pub(crate) fn advance(&mut self, next: PipelineState) {
        if self.state.can_advance_to(next) {
            self.state = next;
            self.history.push(next);
        } else {
            warn!("{}: ignoring transition {} -> {}", self.name, self.state, next);
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Succeeded
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            PipelineState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &PackageArtifact> {
        self.targets.iter().flat_map(|t| t.artifacts.iter())
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        let mut line = format!("{}: {}", self.name, self.state);
        if self.cache_hit {
            line.push_str(" (cached)");
        }
        let count = self.artifacts().count();
        if count > 0 {
            line.push_str(&format!(", {} package(s)", count));
        }
        if let Some(error) = &self.error {
            let first = error.lines().next().unwrap_or_default();
            line.push_str(&format!(": {}", first));
        }
        line
    }
}
