//! Dependency-ordered step execution.
//!
//! Steps run in sequence. On the apply path a failure halts everything that
//! follows; on the destroy path it is downgraded to a warning so cleanup
//! continues elsewhere. Parallel groups within a phase are joined before
//! the next step starts.

use std::future::Future;

use deploykit_core::{Error, Result, RunSummary, StepResult};
use futures::future::join_all;
use tracing::{error, info, warn};

/// Direction of the pipeline; decides what a step failure means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    Destroy,
}

/// Outcome a step reports when it finishes without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Something was created, updated, or deleted.
    Changed,
    /// The resource already matched desired state.
    Unchanged(String),
}

/// Runs named steps in order and aggregates their results.
pub struct StepRunner {
    mode: Mode,
    summary: RunSummary,
    halted: bool,
}

impl StepRunner {
    pub fn new(mode: Mode, region: impl Into<String>, stack_prefix: impl Into<String>) -> Self {
        Self {
            mode,
            summary: RunSummary::new(region, stack_prefix),
            halted: false,
        }
    }

    /// Whether an apply-path failure has stopped the pipeline.
    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    /// Record a result produced outside `run_step` (e.g. by a fan-out).
    pub fn record(&mut self, result: StepResult) {
        if !result.status.is_ok() && self.mode == Mode::Apply {
            self.halted = true;
        }
        self.summary.record(result);
    }

    /// Execute one step. Skipped silently if the pipeline already halted.
    pub async fn run_step<F, Fut>(&mut self, name: &str, op: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StepOutcome>>,
    {
        if self.halted {
            return;
        }
        info!(step = name, "step starting");
        match op().await {
            Ok(StepOutcome::Changed) => {
                info!(step = name, "step succeeded");
                self.summary.record(StepResult::succeeded(name));
            }
            Ok(StepOutcome::Unchanged(reason)) => {
                info!(step = name, %reason, "step skipped, already current");
                self.summary.record(StepResult::skipped(name, reason));
            }
            Err(Error::Timeout(detail)) => {
                self.fail(name, StepResult::timed_out(name, detail));
            }
            Err(e) => {
                self.fail(name, StepResult::failed(name, e.to_string()));
            }
        }
    }

    /// Execute a named group of independent operations concurrently and
    /// join them all before returning. Each member gets its own result.
    pub async fn run_parallel<Fut>(&mut self, phase: &str, members: Vec<(String, Fut)>)
    where
        Fut: Future<Output = Result<StepOutcome>>,
    {
        if self.halted {
            return;
        }
        info!(phase, members = members.len(), "phase starting");

        let futures = members.into_iter().map(|(name, fut)| async move {
            let result = fut.await;
            (name, result)
        });

        for (name, result) in join_all(futures).await {
            let step = format!("{phase}/{name}");
            match result {
                Ok(StepOutcome::Changed) => self.summary.record(StepResult::succeeded(&step)),
                Ok(StepOutcome::Unchanged(reason)) => {
                    self.summary.record(StepResult::skipped(&step, reason))
                }
                Err(Error::Timeout(detail)) => {
                    self.fail(&step, StepResult::timed_out(&step, detail))
                }
                Err(e) => self.fail(&step, StepResult::failed(&step, e.to_string())),
            }
        }
    }

    fn fail(&mut self, name: &str, result: StepResult) {
        match self.mode {
            Mode::Apply => {
                error!(step = name, detail = ?result.detail, "step failed, halting pipeline");
                self.halted = true;
            }
            Mode::Destroy => {
                warn!(step = name, detail = ?result.detail, "step failed, continuing teardown");
            }
        }
        self.summary.record(result);
    }
}
