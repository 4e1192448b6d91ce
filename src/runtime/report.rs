//! Per-stage outcome summaries

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use super::multi_error::{count_leaves, RunError};

/// Top-level pipeline phase, always run in declaration order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Load,
    /// Opt-in copy into the application schemas
    Migrate,
}

impl Stage {
    /// Every stage, in run order
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Transform, Stage::Load, Stage::Migrate];

    /// Stages of a run that does not ask for anything else
    pub const DEFAULT: [Stage; 3] = [Stage::Extract, Stage::Transform, Stage::Load];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Transform => write!(f, "transform"),
            Stage::Load => write!(f, "load"),
            Stage::Migrate => write!(f, "migrate"),
        }
    }
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

/// `{failed_count, elapsed}` for one stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub stage: Stage,
    pub failed_count: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Stage was not run (see `Pipeline::run` for when stages are skipped)
    pub skipped: bool,
}

impl Report {
    pub fn from_outcome(stage: Stage, outcome: &Result<(), RunError>, elapsed: Duration) -> Self {
        Self {
            stage,
            failed_count: count_leaves(outcome.as_ref().err()),
            elapsed,
            skipped: false,
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            failed_count: 0,
            elapsed: Duration::ZERO,
            skipped: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && !self.skipped
    }

    /// One-line status for logs: marker, failed count, elapsed time
    pub fn status_line(&self) -> String {
        if self.skipped {
            return format!("⏭ {} skipped", self.stage);
        }
        let marker = if self.failed_count == 0 { "✅" } else { "❌" };
        format!(
            "{marker} {} finished with {} errors in {:.2?}",
            self.stage, self.failed_count, self.elapsed
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_line())
    }
}

/// Reports of one pipeline run, in stage order
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub reports: Vec<Report>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl PipelineSummary {
    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed_count).sum()
    }

    pub fn is_success(&self) -> bool {
        self.total_failed() == 0
    }

    pub fn report(&self, stage: Stage) -> Option<&Report> {
        self.reports.iter().find(|r| r.stage == stage)
    }
}
