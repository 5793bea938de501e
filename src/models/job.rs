//! Terminal job outcomes and the aggregate run summary.

use serde::Serialize;

/// Terminal state of one subject-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobOutcome {
    /// Every stage ran and the completion marker was written.
    Completed,
    /// The completion marker already existed; nothing ran.
    AlreadyComplete,
    /// No session had data; nothing ran and no marker was written.
    NoSessions,
    /// A stage failed; carries the exit code of the first failure.
    Failed {
        /// Exit code reported by the failing unit.
        code: i32,
    },
}

impl JobOutcome {
    /// Whether the job ended without a failure.
    #[must_use]
    pub fn is_ok(self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Aggregate result of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs that ran to completion.
    pub completed: usize,
    /// Jobs skipped by the idempotency gate.
    pub already_complete: usize,
    /// Jobs with nothing to do.
    pub no_sessions: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Highest number of subject slots held at once.
    pub peak_concurrency: usize,
}

impl RunSummary {
    /// Fold one job outcome into the summary.
    pub fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::AlreadyComplete => self.already_complete += 1,
            JobOutcome::NoSessions => self.no_sessions += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Total number of jobs that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.already_complete + self.no_sessions + self.failed
    }

    /// Whether any job failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
