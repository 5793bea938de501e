//! Global configuration parsing, validation, and environment overrides.
//!
//! Every path the orchestrator touches is derived from a single base
//! directory. Pipeline layout (sessions, raw-data templates, stage
//! commands, toolchain probes) comes from an optional TOML file; the two
//! numeric resource knobs can be overridden from the environment.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Environment knob for the number of subject-jobs admitted concurrently.
pub const ENV_MAX_SUBJECTS: &str = "PREPFLOW_MAX_SUBJECTS";

/// Environment knob for the per-subject CPU budget.
pub const ENV_CPUS_PER_SUBJECT: &str = "PREPFLOW_CPUS_PER_SUBJECT";

/// File name of the completion marker inside a subject's output directory.
pub const COMPLETION_MARKER: &str = ".processing_complete";

/// One session label and where its raw data lives.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Closed-set session label, e.g. `01`.
    pub label: String,
    /// Raw-data directory relative to `sourcedata_root`; `{subject}` is substituted.
    pub raw_dir: String,
}

/// Predicate describing a qualifying raw-data file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RawDataConfig {
    /// Path component that must appear between the session dir and the file.
    pub marker_component: String,
    /// File extension (without the dot) of a raw file.
    pub extension: String,
    /// Deepest directory level below the session dir that is descended
    /// into; directories one level deeper are listed but not entered.
    pub max_depth: usize,
}

impl Default for RawDataConfig {
    fn default() -> Self {
        Self {
            marker_component: "DICOM".into(),
            extension: "dcm".into(),
            max_depth: 5,
        }
    }
}

/// Completeness predicate for a (task, run) unit inside a session's `func` dir.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TaskRunConfig {
    /// Suffix of the file that announces a candidate unit.
    pub anchor_suffix: String,
    /// Suffixes that must all exist for the unit to be processed.
    pub required_suffixes: Vec<String>,
}

impl Default for TaskRunConfig {
    fn default() -> Self {
        let mut required = Vec::new();
        for part in ["mag", "phase"] {
            for echo in 1..=4 {
                required.push(format!("echo-{echo}_part-{part}_bold.nii.gz"));
            }
        }
        for echo in 1..=4 {
            required.push(format!("echo-{echo}_part-phase_bold.json"));
        }
        Self {
            anchor_suffix: "echo-1_part-mag_bold.json".into(),
            required_suffixes: required,
        }
    }
}

/// Argv templates for the leaf commands of each stage.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StageCommands {
    /// Per-session data preparation.
    pub prep: Vec<String>,
    /// Per-(session, task, run) processing.
    pub process: Vec<String>,
    /// Subject-wide metadata linking.
    pub link: Vec<String>,
}

impl Default for StageCommands {
    fn default() -> Self {
        Self {
            prep: vec![
                "bash".into(),
                "{script_dir}/prepdata_ratelimited.sh".into(),
                "{subject}".into(),
                "{session}".into(),
            ],
            process: vec![
                "bash".into(),
                "{script_dir}/warpkit.sh".into(),
                "{subject}".into(),
                "{session}".into(),
                "{task}".into(),
                "{run}".into(),
            ],
            link: vec![
                "python".into(),
                "{script_dir}/addIntendedFor-fmap.py".into(),
                "{bids_dir}".into(),
            ],
        }
    }
}

/// Host toolchain layout probed by each job's environment bootstrap.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ToolchainConfig {
    /// Candidate conda installations, in priority order; `{user}` is substituted.
    pub conda_roots: Vec<String>,
    /// Executables that must be on `PATH`; each entry lists acceptable alternatives.
    pub required_tools: Vec<Vec<String>>,
    /// Candidate FSL installations used when `FSLDIR` is unset.
    pub fsl_dirs: Vec<PathBuf>,
    /// Exported as `TEMPLATEFLOW_HOME` when the directory exists.
    pub templateflow_home: Option<PathBuf>,
    /// Exported as `MPLCONFIGDIR` when the directory exists.
    pub mplconfigdir: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            conda_roots: vec![
                "/ZPOOL/data/tools/anaconda/{user}/anaconda3".into(),
                "/ZPOOL/data/tools/anaconda/{user}/miniconda3".into(),
                "/opt/conda".into(),
                "/usr/local/conda".into(),
            ],
            required_tools: vec![
                vec!["pydeface".into()],
                vec!["singularity".into(), "apptainer".into()],
            ],
            fsl_dirs: vec!["/usr/local/fsl".into(), "/opt/fsl".into()],
            templateflow_home: Some("/ZPOOL/data/tools/templateflow".into()),
            mplconfigdir: Some("/ZPOOL/data/tools/mplconfigdir".into()),
        }
    }
}

fn default_max_concurrent_subjects() -> usize {
    16
}

fn default_cpus_per_subject() -> usize {
    6
}

fn default_sessions() -> Vec<SessionConfig> {
    vec![
        SessionConfig {
            label: "01".into(),
            raw_dir: "Smith-SRA-{subject}/Smith-SRA-{subject}/scans".into(),
        },
        SessionConfig {
            label: "02".into(),
            raw_dir: "Smith-SRA-{subject}-2/Smith-SRA-{subject}-2/scans".into(),
        },
    ]
}

fn default_designated_session() -> String {
    "02".into()
}

/// Global configuration for one orchestrator invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Project base directory; populated by the loader, never read from TOML.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Root of the raw source data; defaults to `<base>/sourcedata`.
    #[serde(default)]
    pub sourcedata_root: Option<PathBuf>,
    /// Maximum subject-jobs holding a slot at once.
    #[serde(default = "default_max_concurrent_subjects")]
    pub max_concurrent_subjects: usize,
    /// CPU budget for one subject-job.
    #[serde(default = "default_cpus_per_subject")]
    pub cpus_per_subject: usize,
    /// Known session labels and their raw-data locations.
    #[serde(default = "default_sessions")]
    pub sessions: Vec<SessionConfig>,
    /// Session whose holders are projected to a separate subject list.
    #[serde(default = "default_designated_session")]
    pub designated_session: String,
    /// Raw-file predicate.
    #[serde(default)]
    pub raw_data: RawDataConfig,
    /// Task-run completeness predicate.
    #[serde(default)]
    pub task_runs: TaskRunConfig,
    /// Leaf command templates.
    #[serde(default)]
    pub commands: StageCommands,
    /// Toolchain bootstrap probes.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

impl GlobalConfig {
    /// Build the default configuration rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `base_dir` does not exist.
    pub fn for_base_dir(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str("", base_dir)
    }

    /// Load configuration for `base_dir`, optionally layering a TOML file,
    /// then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, an environment knob is malformed, or validation fails.
    pub fn load(base_dir: impl AsRef<Path>, config_path: Option<&Path>) -> Result<Self> {
        let raw = match config_path {
            Some(path) => fs::read_to_string(path).map_err(|err| {
                AppError::Config(format!("failed to read config {}: {err}", path.display()))
            })?,
            None => String::new(),
        };
        let mut config = Self::from_toml_str(&raw, base_dir)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str, base_dir: impl AsRef<Path>) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.base_dir = base_dir.as_ref().to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Apply the numeric resource knobs from a key lookup (normally the
    /// process environment).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a knob is present but not a positive integer.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_SUBJECTS) {
            self.max_concurrent_subjects = parse_positive(ENV_MAX_SUBJECTS, &value)?;
            debug!(max_concurrent_subjects = self.max_concurrent_subjects, "override from env");
        }
        if let Some(value) = lookup(ENV_CPUS_PER_SUBJECT) {
            self.cpus_per_subject = parse_positive(ENV_CPUS_PER_SUBJECT, &value)?;
            debug!(cpus_per_subject = self.cpus_per_subject, "override from env");
        }
        Ok(())
    }

    /// Directory holding the roster, cache, and helper scripts.
    #[must_use]
    pub fn script_dir(&self) -> PathBuf {
        self.base_dir.join("code")
    }

    /// Newline-delimited subject roster.
    #[must_use]
    pub fn roster_path(&self) -> PathBuf {
        self.script_dir().join("sublist.txt")
    }

    /// Persisted discovery cache document.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.script_dir().join(".session_cache.json")
    }

    /// Projection of subjects holding the designated session.
    #[must_use]
    pub fn designated_list_path(&self) -> PathBuf {
        self.script_dir()
            .join(format!("sublist_ses{}.txt", self.designated_session))
    }

    /// Root of the pipeline's output tree.
    #[must_use]
    pub fn bids_dir(&self) -> PathBuf {
        self.base_dir.join("bids")
    }

    /// Shared, append-only job log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join("prepflow.log")
    }

    /// Root of the raw source data.
    #[must_use]
    pub fn sourcedata_root(&self) -> PathBuf {
        self.sourcedata_root
            .clone()
            .unwrap_or_else(|| self.base_dir.join("sourcedata"))
    }

    /// Output directory for one subject.
    #[must_use]
    pub fn subject_output_dir(&self, subject: &str) -> PathBuf {
        self.bids_dir().join(format!("sub-{subject}"))
    }

    /// Output directory for one (subject, session) pair.
    #[must_use]
    pub fn session_output_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.subject_output_dir(subject).join(format!("ses-{session}"))
    }

    /// Completion marker path for one subject.
    #[must_use]
    pub fn marker_path(&self, subject: &str) -> PathBuf {
        self.subject_output_dir(subject).join(COMPLETION_MARKER)
    }

    /// Raw-data directory for one (subject, session) pair, if the label is known.
    #[must_use]
    pub fn raw_session_dir(&self, subject: &str, session: &str) -> Option<PathBuf> {
        self.sessions
            .iter()
            .find(|s| s.label == session)
            .map(|s| self.sourcedata_root().join(s.raw_dir.replace("{subject}", subject)))
    }

    /// Session labels in configured order.
    #[must_use]
    pub fn session_labels(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.label.clone()).collect()
    }

    /// Concurrency cap for task-run units within one session.
    #[must_use]
    pub fn task_run_limit(&self) -> usize {
        (self.cpus_per_subject / 2).max(1)
    }

    /// Thread count exported to numeric libraries inside each job.
    #[must_use]
    pub fn thread_limit(&self) -> usize {
        (self.cpus_per_subject / 2).max(1)
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_subjects == 0 {
            return Err(AppError::Config(
                "max_concurrent_subjects must be greater than zero".into(),
            ));
        }
        if self.cpus_per_subject == 0 {
            return Err(AppError::Config(
                "cpus_per_subject must be greater than zero".into(),
            ));
        }
        if self.sessions.is_empty() {
            return Err(AppError::Config("sessions must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for session in &self.sessions {
            if session.label.is_empty() || !seen.insert(session.label.as_str()) {
                return Err(AppError::Config(format!(
                    "session label {:?} is empty or duplicated",
                    session.label
                )));
            }
        }
        if !seen.contains(self.designated_session.as_str()) {
            return Err(AppError::Config(format!(
                "designated_session {:?} is not a configured session",
                self.designated_session
            )));
        }

        for (stage, argv) in [
            ("prep", &self.commands.prep),
            ("process", &self.commands.process),
            ("link", &self.commands.link),
        ] {
            if argv.is_empty() {
                return Err(AppError::Config(format!(
                    "commands.{stage} must name a program"
                )));
            }
        }

        if self.task_runs.anchor_suffix.is_empty() {
            return Err(AppError::Config(
                "task_runs.anchor_suffix must not be empty".into(),
            ));
        }

        let canonical_base = self
            .base_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("base_dir invalid: {err}")))?;
        self.base_dir = canonical_base;

        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AppError::Config(format!(
            "{key} must be a positive integer, got {value:?}"
        ))),
    }
}
