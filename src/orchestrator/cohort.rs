//! End-to-end cohort run: roster, discovery, planning, scheduling.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, info_span, Instrument};

use crate::chain;
use crate::config::GlobalConfig;
use crate::discovery::{self, DiscoveryCache};
use crate::joblog::{JobLog, SharedLogWriter};
use crate::models::subject::read_roster;
use crate::models::{JobOutcome, RunSummary, Subject};
use crate::orchestrator::context::RunContext;
use crate::orchestrator::gate;
use crate::orchestrator::scheduler::{self, Job};
use crate::{AppError, Result};

/// Identity used for orchestrator-level lines in the shared log.
pub const ORCHESTRATOR_IDENTITY: &str = "prepflow";

/// Options for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore the persisted discovery cache.
    pub force_rescan: bool,
}

/// Subjects split by the idempotency gate's pre-check.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Jobs to hand to the scheduler, in roster order.
    pub jobs: Vec<Job>,
    /// Subjects whose completion marker already exists.
    pub already_complete: Vec<Subject>,
}

/// Build jobs for every subject that has not completed yet.
#[must_use]
pub fn plan(config: &GlobalConfig, subjects: &[Subject], cache: &DiscoveryCache) -> Plan {
    let mut plan = Plan::default();
    for subject in subjects {
        if gate::is_complete(&config.marker_path(subject.as_str())) {
            plan.already_complete.push(subject.clone());
            continue;
        }
        let chain = chain::build(config, subject, cache.sessions_for(subject));
        plan.jobs.push(Job::new(subject.clone(), chain));
    }
    plan
}

/// Run the whole cohort and return the aggregate summary.
///
/// # Errors
///
/// Returns an error only for startup failures (roster, discovery
/// persistence, log file). Job failures are reported in the summary.
pub async fn run_cohort(config: GlobalConfig, options: RunOptions) -> Result<RunSummary> {
    let span = info_span!("run_cohort", base_dir = %config.base_dir.display());
    async move {
        let subjects = read_roster(&config.roster_path())?;
        info!(subjects = subjects.len(), "roster loaded");

        let scan_config = config.clone();
        let scan_subjects = subjects.clone();
        let discovery = tokio::task::spawn_blocking(move || {
            discovery::discover(&scan_config, &scan_subjects, options.force_rescan)
        })
        .await
        .map_err(|err| AppError::Discovery(format!("discovery task panicked: {err}")))??;

        report_skipped(&subjects, &discovery.cache);

        let sink = Arc::new(SharedLogWriter::open(config.log_path())?);
        let ctx = RunContext::new(config, discovery.cache, sink);
        let banner = ctx.job_log(ORCHESTRATOR_IDENTITY);
        write_banner(&banner, &ctx, &subjects);

        let plan = plan(&ctx.config, &subjects, &ctx.cache);
        let mut summary = RunSummary::default();
        for subject in &plan.already_complete {
            ctx.job_log(subject.job_identity())
                .emit(&format!("Subject {subject} already complete, skipping"));
            summary.record(JobOutcome::AlreadyComplete);
        }

        let max = ctx.config.max_concurrent_subjects;
        let ran = scheduler::run(&ctx, plan.jobs, max).await;
        summary.completed += ran.completed;
        summary.already_complete += ran.already_complete;
        summary.no_sessions += ran.no_sessions;
        summary.failed += ran.failed;
        summary.peak_concurrency = ran.peak_concurrency;

        banner.emit(&format!(
            "Run finished: completed={} already_complete={} no_sessions={} failed={}",
            summary.completed, summary.already_complete, summary.no_sessions, summary.failed
        ));
        info!(?summary, "cohort run finished");
        Ok(summary)
    }
    .instrument(span)
    .await
}

fn report_skipped(subjects: &[Subject], cache: &DiscoveryCache) {
    let skipped: Vec<&str> = subjects
        .iter()
        .filter(|s| cache.sessions_for(s).is_empty())
        .map(Subject::as_str)
        .collect();
    info!(
        with_data = subjects.len() - skipped.len(),
        without_sessions = skipped.len(),
        "discovery complete"
    );
    if !skipped.is_empty() {
        let shown = skipped.iter().take(10).copied().collect::<Vec<_>>().join(", ");
        let more = if skipped.len() > 10 {
            format!(" ... and {} more", skipped.len() - 10)
        } else {
            String::new()
        };
        info!("skipped (no sessions): {shown}{more}");
    }
}

fn write_banner(log: &JobLog, ctx: &RunContext, subjects: &[Subject]) {
    let config = &ctx.config;
    let with_data = subjects
        .iter()
        .filter(|s| !ctx.cache.sessions_for(s).is_empty())
        .count();
    let designated = ctx.cache.subjects_with(&config.designated_session).len();

    log.emit(&"=".repeat(80));
    log.emit(&format!("Preprocessing launch: {}", Local::now().to_rfc3339()));
    log.emit(&format!("Subjects total: {}", subjects.len()));
    log.emit(&format!("Subjects to process: {with_data}"));
    log.emit(&format!("Subjects skipped: {}", subjects.len() - with_data));
    log.emit(&format!(
        "Max concurrent subjects: {}",
        config.max_concurrent_subjects
    ));
    log.emit(&format!("CPUs per subject: {}", config.cpus_per_subject));
    log.emit(&format!(
        "Sessions (requested): {}",
        config.session_labels().join(", ")
    ));
    log.emit(&format!(
        "Holding ses-{}: {designated}",
        config.designated_session
    ));
    log.emit(&"=".repeat(80));
}
