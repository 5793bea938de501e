//! Task-run unit discovery over a session's output directory.
//!
//! Pure filesystem query: no process is spawned and nothing is cached,
//! because the files it looks for are produced by an earlier stage of the
//! same chain.

use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::config::TaskRunConfig;
use crate::models::TaskRunUnit;
use crate::{AppError, Result};

/// Enumerate complete task-run units in `output_dir`.
///
/// File names follow `<prefix>_task-<task>_run-<run>_<suffix>`. A unit is a
/// candidate when its anchor file exists and complete when every required
/// suffix exists too. Returns units sorted by task label, then numeric run.
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns `AppError::Discovery` if the directory path is not valid UTF-8
/// or cannot be listed.
pub fn discover_task_runs(
    output_dir: &Path,
    prefix: &str,
    spec: &TaskRunConfig,
) -> Result<Vec<TaskRunUnit>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }

    let dir = output_dir.to_str().ok_or_else(|| {
        AppError::Discovery(format!("non UTF-8 path {}", output_dir.display()))
    })?;
    let pattern = format!(
        "{}/*{}",
        glob::Pattern::escape(dir),
        glob::Pattern::escape(&spec.anchor_suffix)
    );
    let name_re = Regex::new(&format!(
        r"^{}_task-([A-Za-z0-9]+)_run-([0-9]+)_{}$",
        regex::escape(prefix),
        regex::escape(&spec.anchor_suffix)
    ))
    .map_err(|err| AppError::Discovery(format!("bad task-run pattern: {err}")))?;

    let entries = glob::glob(&pattern)
        .map_err(|err| AppError::Discovery(format!("bad glob {pattern}: {err}")))?;

    let mut units = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| AppError::Discovery(format!("cannot list {dir}: {err}")))?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = name_re.captures(name) else {
            continue;
        };
        let Some(unit) = TaskRunUnit::parse(&caps[1], &caps[2]) else {
            warn!(file = name, "run number out of range; unit skipped");
            continue;
        };
        let complete = spec.required_suffixes.iter().all(|suffix| {
            output_dir
                .join(format!(
                    "{prefix}_task-{}_run-{}_{suffix}",
                    unit.task, unit.run_label
                ))
                .exists()
        });
        if complete {
            units.push(unit);
        }
    }

    units.sort();
    units.dedup();
    Ok(units)
}
