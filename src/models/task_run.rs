//! Task-run units discovered inside a session's output directory.

use std::fmt::{Display, Formatter};

/// One (task, run) processing target.
///
/// Ordering is by task label, then numeric run, so `run-2` sorts before
/// `run-10`. The run label keeps its spelling from the file name (e.g.
/// `01`) because leaf commands receive it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskRunUnit {
    /// Task label, e.g. `rest`.
    pub task: String,
    /// Numeric run used for ordering.
    pub run: u32,
    /// Run exactly as spelled in the file name.
    pub run_label: String,
}

impl TaskRunUnit {
    /// Build a unit from a task label and the run digits of a file name.
    ///
    /// Returns `None` if `run_label` is not a decimal number or does not
    /// fit in a `u32`.
    #[must_use]
    pub fn parse(task: &str, run_label: &str) -> Option<Self> {
        if run_label.is_empty() || !run_label.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let run = run_label.parse().ok()?;
        Some(Self {
            task: task.to_owned(),
            run,
            run_label: run_label.to_owned(),
        })
    }
}

impl Display for TaskRunUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{} run-{}", self.task, self.run_label)
    }
}
