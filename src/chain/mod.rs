//! In-memory stage graph for one subject.
//!
//! A [`Chain`] is an ordered list of [`Stage`]s. Fan-out stages hold
//! independent [`WorkItem`]s that run concurrently and join before the next
//! stage starts. Task-run groups are expanded lazily at execution time
//! because their inputs are produced by the preceding stage.

pub mod builder;

use std::path::PathBuf;

use crate::config::TaskRunConfig;
use crate::discovery::discover_task_runs;
use crate::models::Subject;
use crate::Result;

pub use builder::build;

/// One external command, fully expanded. Arguments are passed to the
/// program directly; no shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Unit label used in start/end markers, e.g. `prep ses-01`.
    pub label: String,
    /// Executable name or path.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Expand an argv template. The first element is the program.
    ///
    /// Returns `None` for an empty template.
    #[must_use]
    pub fn from_template(
        label: impl Into<String>,
        template: &[String],
        vars: &[(String, String)],
    ) -> Option<Self> {
        let (program, args) = template.split_first()?;
        Some(Self {
            label: label.into(),
            program: expand(program, vars),
            args: args.iter().map(|a| expand(a, vars)).collect(),
        })
    }
}

/// Substitute `{key}` placeholders.
#[must_use]
pub fn expand(template: &str, vars: &[(String, String)]) -> String {
    let mut out = template.to_owned();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Discover-then-process sub-job for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunGroup {
    /// Session label.
    pub session: String,
    /// Directory searched for task-run units.
    pub output_dir: PathBuf,
    /// File-name prefix, e.g. `sub-1234_ses-01`.
    pub prefix: String,
    /// Completeness predicate.
    pub pattern: TaskRunConfig,
    /// Argv template for each unit.
    pub template: Vec<String>,
    /// Placeholder values shared by every unit of the group.
    pub vars: Vec<(String, String)>,
    /// Maximum units running at once.
    pub limit: usize,
}

impl TaskRunGroup {
    /// Discover complete units and expand one command per unit, in
    /// task/run order. `{run}` expands to the numeric run (`01` becomes
    /// `1`); the unit label keeps the file-name spelling.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Discovery` if the output directory cannot be listed.
    pub fn expand(&self) -> Result<Vec<CommandSpec>> {
        let units = discover_task_runs(&self.output_dir, &self.prefix, &self.pattern)?;
        Ok(units
            .iter()
            .filter_map(|unit| {
                let mut vars = self.vars.clone();
                vars.push(("task".into(), unit.task.clone()));
                vars.push(("run".into(), unit.run.to_string()));
                CommandSpec::from_template(
                    format!("process ses-{} {unit}", self.session),
                    &self.template,
                    &vars,
                )
            })
            .collect())
    }
}

/// Independent unit inside a fan-out stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A single command.
    Command(CommandSpec),
    /// Lazy discovery followed by a nested bounded fan-out.
    TaskRuns(TaskRunGroup),
}

/// One step of a subject's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Short-circuit the whole chain successfully when the marker exists.
    SkipIfComplete {
        /// Completion marker path.
        marker: PathBuf,
    },
    /// Run one command; failure stops the chain.
    Run(CommandSpec),
    /// Run items concurrently, join all, then stop the chain if any failed.
    FanOut {
        /// Stage name used in log lines.
        name: String,
        /// Items to run.
        items: Vec<WorkItem>,
        /// Maximum items running at once.
        limit: usize,
    },
    /// Write the completion marker.
    Commit {
        /// Completion marker path.
        marker: PathBuf,
    },
    /// Log a message and end the chain without a marker.
    Skip {
        /// Message written to the log.
        reason: String,
    },
}

impl Stage {
    /// Short name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::SkipIfComplete { .. } => "skip-check",
            Self::Run(cmd) => &cmd.label,
            Self::FanOut { name, .. } => name,
            Self::Commit { .. } => "commit",
            Self::Skip { .. } => "skip",
        }
    }
}

/// Ordered stage list for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Owning subject.
    pub subject: Subject,
    /// Stages in execution order.
    pub stages: Vec<Stage>,
}

impl Chain {
    /// Whether the chain is the "no sessions" placeholder.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self.stages.as_slice(), [Stage::Skip { .. }])
    }

    /// Stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }
}
