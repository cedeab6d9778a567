//! Step results and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// The resource already matched desired state; nothing was changed.
    Skipped,
    Failed,
    TimedOut,
}

impl StepStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Result of one named step, kept for the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub detail: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(name: impl Into<String>) -> Self {
        Self::finish(name, StepStatus::Succeeded, None)
    }

    pub fn skipped(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::finish(name, StepStatus::Skipped, Some(detail.into()))
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::finish(name, StepStatus::Failed, Some(detail.into()))
    }

    pub fn timed_out(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::finish(name, StepStatus::TimedOut, Some(detail.into()))
    }

    fn finish(name: impl Into<String>, status: StepStatus, detail: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail,
            finished_at: Utc::now(),
        }
    }
}

/// Aggregate of one orchestrator invocation. Lives only for the run,
/// optionally flushed to `deployment-info.json` at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub region: String,
    pub stack_prefix: String,
    pub steps: Vec<StepResult>,
    /// Resources still present after a destroy run, for manual cleanup.
    pub remaining: Vec<String>,
}

impl RunSummary {
    pub fn new(region: impl Into<String>, stack_prefix: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            region: region.into(),
            stack_prefix: stack_prefix.into(),
            steps: Vec::new(),
            remaining: Vec::new(),
        }
    }

    pub fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn success(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.status.is_ok())
    }
}
