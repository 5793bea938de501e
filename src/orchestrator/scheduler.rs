//! Bounded scheduler over subject-jobs.
//!
//! Admits jobs first-submitted, first-admitted, with at most
//! `max_concurrent` holding a slot. A failed job never cancels the others;
//! the run ends once every job is terminal and the summary aggregates all
//! outcomes. A job whose task aborts still gets a failing end marker.

use std::sync::Arc;

use tracing::{error, info};

use crate::chain::Chain;
use crate::models::{JobOutcome, RunSummary, Subject};
use crate::orchestrator::context::RunContext;
use crate::orchestrator::executor::{wrap, INTERNAL_FAILURE_EXIT_CODE};
use crate::orchestrator::group::{run_bounded, SlotGauge};

/// The unit the scheduler admits: one subject and its chain.
#[derive(Debug, Clone)]
pub struct Job {
    /// Owning subject.
    pub subject: Subject,
    /// Stages to run.
    pub chain: Chain,
}

impl Job {
    /// Pair a subject with its chain.
    #[must_use]
    pub fn new(subject: Subject, chain: Chain) -> Self {
        Self { subject, chain }
    }

    /// Log identity, e.g. `sub-1234`.
    #[must_use]
    pub fn identity(&self) -> String {
        self.subject.job_identity()
    }
}

/// Run `jobs` with at most `max_concurrent` in flight.
pub async fn run(ctx: &RunContext, jobs: Vec<Job>, max_concurrent: usize) -> RunSummary {
    run_with_gauge(ctx, jobs, max_concurrent, Arc::new(SlotGauge::default())).await
}

/// Like [`run`], recording slot occupancy in `gauge`.
pub async fn run_with_gauge(
    ctx: &RunContext,
    jobs: Vec<Job>,
    max_concurrent: usize,
    gauge: Arc<SlotGauge>,
) -> RunSummary {
    info!(jobs = jobs.len(), max_concurrent, "scheduler starting");
    let identities: Vec<String> = jobs.iter().map(Job::identity).collect();

    let worker_ctx = ctx.clone();
    let worker_gauge = Arc::clone(&gauge);
    let results = run_bounded(jobs, max_concurrent, move |job: Job| {
        let ctx = worker_ctx.clone();
        let gauge = Arc::clone(&worker_gauge);
        async move {
            let _slot = gauge.enter();
            let identity = job.identity();
            info!(%identity, "job admitted");
            let outcome = wrap(identity.clone(), job.chain).run(&ctx).await;
            info!(%identity, ?outcome, "job finished");
            outcome
        }
    })
    .await;

    let mut summary = RunSummary::default();
    for (identity, result) in identities.iter().zip(results) {
        let outcome = result.unwrap_or_else(|err| {
            error!(%identity, %err, "job task aborted");
            ctx.job_log(identity.as_str())
                .end(identity, INTERNAL_FAILURE_EXIT_CODE);
            JobOutcome::Failed {
                code: INTERNAL_FAILURE_EXIT_CODE,
            }
        });
        summary.record(outcome);
    }
    summary.peak_concurrency = gauge.peak();
    summary
}
