// src/runner/report.rs

//! Results of a catalogue run

use crate::pipeline::PipelineReport;
use std::time::Duration;

/// A unit that never ran because a dependency did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPipeline {
    pub name: String,
    /// Direct dependencies that failed or were skipped themselves
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Reports of every pipeline that ran, wave by wave
    pub reports: Vec<PipelineReport>,
    pub skipped: Vec<SkippedPipeline>,
    /// Planned execution order
    pub order: Vec<String>,
    pub duration: Duration,
}

impl RunReport {
    pub fn get(&self, name: &str) -> Option<&PipelineReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PipelineReport> {
        self.reports.iter().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineReport> {
        self.reports.iter().filter(|r| !r.succeeded())
    }

    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.reports.iter().all(PipelineReport::succeeded)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped in {:.1}s",
            self.succeeded().count(),
            self.failed().count(),
            self.skipped.len(),
            self.duration.as_secs_f64()
        )
    }
}
