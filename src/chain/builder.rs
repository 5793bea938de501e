//! Per-subject chain construction.

use crate::chain::{Chain, CommandSpec, Stage, TaskRunGroup, WorkItem};
use crate::config::GlobalConfig;
use crate::models::Subject;

/// Stage name of the per-session preparation fan-out.
pub const PREP_STAGE: &str = "prep";

/// Stage name of the per-session discover-and-process fan-out.
pub const PROCESS_STAGE: &str = "process";

/// Unit label of the metadata-linking command.
pub const LINK_UNIT: &str = "link-metadata";

/// Build the stage list for `subject` over its present sessions.
///
/// Fixed order: skip-check, prep fan-out, discover-and-process fan-out,
/// metadata linking, commit. An empty session set yields a single skip
/// stage that never writes a marker.
#[must_use]
pub fn build(config: &GlobalConfig, subject: &Subject, present_sessions: &[String]) -> Chain {
    if present_sessions.is_empty() {
        return Chain {
            subject: subject.clone(),
            stages: vec![Stage::Skip {
                reason: format!("Skipping {}: no sessions present", subject.job_identity()),
            }],
        };
    }

    let marker = config.marker_path(subject.as_str());
    let base_vars = base_vars(config, subject);

    let prep_items: Vec<WorkItem> = present_sessions
        .iter()
        .filter_map(|session| {
            let vars = with_session(&base_vars, session);
            CommandSpec::from_template(format!("prep ses-{session}"), &config.commands.prep, &vars)
                .map(WorkItem::Command)
        })
        .collect();

    let process_items: Vec<WorkItem> = present_sessions
        .iter()
        .map(|session| {
            WorkItem::TaskRuns(TaskRunGroup {
                session: session.clone(),
                output_dir: config.session_output_dir(subject.as_str(), session).join("func"),
                prefix: format!("{}_ses-{session}", subject.job_identity()),
                pattern: config.task_runs.clone(),
                template: config.commands.process.clone(),
                vars: with_session(&base_vars, session),
                limit: config.task_run_limit(),
            })
        })
        .collect();

    let mut stages = vec![
        Stage::SkipIfComplete {
            marker: marker.clone(),
        },
        Stage::FanOut {
            name: PREP_STAGE.into(),
            limit: prep_items.len().max(1),
            items: prep_items,
        },
        Stage::FanOut {
            name: PROCESS_STAGE.into(),
            limit: process_items.len().max(1),
            items: process_items,
        },
    ];
    if let Some(link) = CommandSpec::from_template(LINK_UNIT, &config.commands.link, &base_vars) {
        stages.push(Stage::Run(link));
    }
    stages.push(Stage::Commit { marker });

    Chain {
        subject: subject.clone(),
        stages,
    }
}

fn base_vars(config: &GlobalConfig, subject: &Subject) -> Vec<(String, String)> {
    vec![
        ("subject".into(), subject.as_str().to_owned()),
        ("script_dir".into(), config.script_dir().display().to_string()),
        ("bids_dir".into(), config.bids_dir().display().to_string()),
        ("base_dir".into(), config.base_dir.display().to_string()),
    ]
}

fn with_session(base: &[(String, String)], session: &str) -> Vec<(String, String)> {
    let mut vars = base.to_vec();
    vars.push(("session".into(), session.to_owned()));
    vars
}
