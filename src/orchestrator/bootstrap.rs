//! Per-job environment bootstrap.
//!
//! Resolved at the start of each job rather than once at startup: the
//! conda installation is keyed by the executing user, and the scratch
//! cache directories are private to the job. The resulting variables are
//! layered over the inherited environment of every leaf command.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Exit code reported when a required executable is missing.
pub const TOOL_MISSING_EXIT_CODE: i32 = 127;

/// Thread-count variables pinned to the per-subject budget.
pub const THREAD_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "MKL_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS",
];

/// Environment overrides for one job.
#[derive(Debug, Clone, Default)]
pub struct JobEnv {
    vars: Vec<(String, String)>,
    scratch_dirs: Vec<PathBuf>,
    conda_root: Option<PathBuf>,
    warnings: Vec<String>,
}

impl JobEnv {
    /// Variables to set on every leaf command.
    #[must_use]
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Value of one override, if set.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Activated conda installation, if one was found.
    #[must_use]
    pub fn conda_root(&self) -> Option<&Path> {
        self.conda_root.as_deref()
    }

    /// Scratch directories created for this job.
    #[must_use]
    pub fn scratch_dirs(&self) -> &[PathBuf] {
        &self.scratch_dirs
    }

    /// Non-fatal findings worth surfacing in the job log.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Remove the job's scratch directories. Failures are only logged.
    pub fn cleanup(&self) {
        for dir in &self.scratch_dirs {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                debug!(dir = %dir.display(), %err, "scratch cleanup skipped");
            }
        }
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.push((key.to_owned(), value.into()));
    }
}

/// Resolve the job environment from the live process environment.
///
/// # Errors
///
/// Returns `AppError::Toolchain` if a required executable is not on `PATH`.
pub fn resolve(config: &GlobalConfig) -> Result<JobEnv> {
    let users = user_candidates(os_user_name(), env::var("USER").ok());
    resolve_with(config, |key| env::var(key).ok(), &users)
}

/// Resolve the job environment from an explicit variable lookup and user
/// name candidates.
///
/// # Errors
///
/// Returns `AppError::Toolchain` if a required executable is not on `PATH`.
pub fn resolve_with<F>(config: &GlobalConfig, lookup: F, users: &[String]) -> Result<JobEnv>
where
    F: Fn(&str) -> Option<String>,
{
    let tc = &config.toolchain;
    let mut job_env = JobEnv::default();
    let mut path: Vec<PathBuf> = lookup("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();

    job_env.conda_root = find_conda_root(&tc.conda_roots, users);
    if let Some(root) = &job_env.conda_root {
        path.insert(0, root.join("bin"));
        job_env.set("CONDA_PREFIX", root.display().to_string());
        job_env.set("CONDA_DEFAULT_ENV", "base");
    } else if find_on_path("conda", &path).is_none() {
        job_env
            .warnings
            .push("WARNING: conda.sh not found; proceeding without 'conda activate'.".into());
    }

    let fsl_dir = lookup("FSLDIR")
        .map(PathBuf::from)
        .or_else(|| tc.fsl_dirs.iter().find(|d| d.is_dir()).cloned());
    if let Some(fsl) = fsl_dir {
        if fsl.join("etc").join("fslconf").join("fsl.sh").is_file() {
            path.push(fsl.join("bin"));
            job_env.set("FSLOUTPUTTYPE", "NIFTI_GZ");
        }
        job_env.set("FSLDIR", fsl.display().to_string());
    }

    for alternatives in &tc.required_tools {
        if !alternatives.iter().any(|tool| find_on_path(tool, &path).is_some()) {
            return Err(AppError::Toolchain(missing_tool_message(alternatives)));
        }
    }

    let joined = env::join_paths(&path)
        .map_err(|err| AppError::Toolchain(format!("cannot assemble PATH: {err}")))?;
    job_env.set("PATH", joined.to_string_lossy().into_owned());

    let threads = config.thread_limit().to_string();
    for key in THREAD_VARS {
        job_env.set(key, threads.clone());
    }

    let tmp = lookup("TMPDIR").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    let id = Uuid::new_v4().simple().to_string();
    for (key, stem) in [
        ("SINGULARITY_CACHEDIR", "singularity-cache"),
        ("APPTAINER_CACHEDIR", "apptainer-cache"),
    ] {
        let dir = tmp.join(format!("{stem}-{id}"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => job_env.scratch_dirs.push(dir.clone()),
            Err(err) => warn!(dir = %dir.display(), %err, "cannot create scratch cache dir"),
        }
        job_env.set(key, dir.display().to_string());
    }

    if let Some(dir) = tc.templateflow_home.as_ref().filter(|d| d.is_dir()) {
        job_env.set("TEMPLATEFLOW_HOME", dir.display().to_string());
    }
    if let Some(dir) = tc.mplconfigdir.as_ref().filter(|d| d.is_dir()) {
        job_env.set("MPLCONFIGDIR", dir.display().to_string());
    }

    Ok(job_env)
}

/// Candidate user names for conda lookup: the OS account, then `$USER`
/// without any `@domain` suffix, then `$USER` verbatim. Duplicates and
/// empty names are dropped.
#[must_use]
pub fn user_candidates(os_user: Option<String>, user_var: Option<String>) -> Vec<String> {
    let stripped = user_var
        .as_deref()
        .map(|u| u.split('@').next().unwrap_or(u).to_owned());
    let mut out: Vec<String> = Vec::new();
    for name in [os_user, stripped, user_var].into_iter().flatten() {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// First conda root, in template order, that ships `etc/profile.d/conda.sh`.
#[must_use]
pub fn find_conda_root(templates: &[String], users: &[String]) -> Option<PathBuf> {
    for template in templates {
        let expanded: Vec<PathBuf> = if template.contains("{user}") {
            users
                .iter()
                .map(|u| PathBuf::from(template.replace("{user}", u)))
                .collect()
        } else {
            vec![PathBuf::from(template)]
        };
        if let Some(root) = expanded
            .into_iter()
            .find(|root| root.join("etc").join("profile.d").join("conda.sh").is_file())
        {
            return Some(root);
        }
    }
    None
}

/// Locate an executable by name on `path`, or check it directly when the
/// name contains a path separator.
#[must_use]
pub fn find_on_path(name: &str, path: &[PathBuf]) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(name);
        return is_executable(&candidate).then_some(candidate);
    }
    path.iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn missing_tool_message(alternatives: &[String]) -> String {
    match alternatives {
        [] => "empty required tool entry".into(),
        [only] => format!("{only} not found on PATH"),
        many => format!("none of {} found on PATH", many.join(", ")),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn os_user_name() -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(not(unix))]
fn os_user_name() -> Option<String> {
    env::var("USERNAME").ok()
}
