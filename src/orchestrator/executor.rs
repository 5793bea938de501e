//! Logged execution of a subject's chain.
//!
//! [`wrap`] binds a chain to its job identity. Running the wrapped job
//! bootstraps the environment, brackets the chain with start/end markers,
//! and streams every line a leaf command prints into the shared log
//! through the job's [`JobLog`]. Any failure, including a missing
//! executable, ends in an attributable `STATUS=FAIL rc=<code>` line.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info_span, warn, Instrument};

use crate::chain::{Chain, CommandSpec, Stage, TaskRunGroup, WorkItem};
use crate::joblog::JobLog;
use crate::models::JobOutcome;
use crate::orchestrator::bootstrap::{self, JobEnv, TOOL_MISSING_EXIT_CODE};
use crate::orchestrator::context::RunContext;
use crate::orchestrator::gate;
use crate::orchestrator::group::{aggregate_codes, run_bounded};

/// Exit code used when a command cannot be launched at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code used for orchestrator-side stage failures (discovery, marker).
pub const INTERNAL_FAILURE_EXIT_CODE: i32 = 1;

/// A chain bound to its log identity, ready to run.
#[derive(Debug, Clone)]
pub struct LoggedJob {
    identity: String,
    chain: Chain,
}

/// Bind `chain` to `identity`.
#[must_use]
pub fn wrap(identity: impl Into<String>, chain: Chain) -> LoggedJob {
    LoggedJob {
        identity: identity.into(),
        chain,
    }
}

enum ChainStatus {
    Completed,
    AlreadyComplete,
    Skipped,
    Failed(i32),
}

impl ChainStatus {
    fn into_outcome(self) -> JobOutcome {
        match self {
            Self::Completed => JobOutcome::Completed,
            Self::AlreadyComplete => JobOutcome::AlreadyComplete,
            Self::Skipped => JobOutcome::NoSessions,
            Self::Failed(code) => JobOutcome::Failed { code },
        }
    }
}

impl LoggedJob {
    /// Log identity of the job.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The wrapped chain.
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Run the chain to a terminal outcome.
    pub async fn run(self, ctx: &RunContext) -> JobOutcome {
        let log = ctx.job_log(self.identity.clone());
        let span = info_span!("job", identity = %self.identity);

        async move {
            if self.chain.is_skip() {
                let job_env = Arc::new(JobEnv::default());
                return run_chain(&self.chain, &job_env, &log).await.into_outcome();
            }

            log.start(&self.identity);

            let job_env = match bootstrap::resolve(&ctx.config) {
                Ok(job_env) => Arc::new(job_env),
                Err(err) => {
                    warn!(%err, "environment bootstrap failed");
                    log.emit(&format!("ERROR: {err}"));
                    log.end(&self.identity, TOOL_MISSING_EXIT_CODE);
                    return JobOutcome::Failed {
                        code: TOOL_MISSING_EXIT_CODE,
                    };
                }
            };
            for warning in job_env.warnings() {
                log.emit(warning);
            }

            let status = run_chain(&self.chain, &job_env, &log).await;
            job_env.cleanup();

            let outcome = status.into_outcome();
            match outcome {
                JobOutcome::Failed { code } => log.end(&self.identity, code),
                _ => log.end(&self.identity, 0),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

async fn run_chain(chain: &Chain, job_env: &Arc<JobEnv>, log: &JobLog) -> ChainStatus {
    for stage in &chain.stages {
        debug!(stage = stage.name(), "stage starting");
        match stage {
            Stage::Skip { reason } => {
                log.emit(reason);
                return ChainStatus::Skipped;
            }
            Stage::SkipIfComplete { marker } => {
                if gate::is_complete(marker) {
                    log.emit(&format!(
                        "Subject {} already complete, skipping",
                        chain.subject
                    ));
                    return ChainStatus::AlreadyComplete;
                }
            }
            Stage::Run(cmd) => {
                let code = run_logged(cmd.clone(), Arc::clone(job_env), log.clone()).await;
                if code != 0 {
                    return ChainStatus::Failed(code);
                }
            }
            Stage::FanOut { name, items, limit } => {
                let code = run_fan_out(items.clone(), *limit, job_env, log).await;
                if code != 0 {
                    log.emit(&format!(
                        "stage {name} failed (rc={code}); later stages skipped"
                    ));
                    return ChainStatus::Failed(code);
                }
            }
            Stage::Commit { marker } => {
                if let Err(err) = gate::mark_complete(marker) {
                    log.emit(&format!("ERROR: {err}"));
                    return ChainStatus::Failed(INTERNAL_FAILURE_EXIT_CODE);
                }
            }
        }
    }
    ChainStatus::Completed
}

async fn run_fan_out(
    items: Vec<WorkItem>,
    limit: usize,
    job_env: &Arc<JobEnv>,
    log: &JobLog,
) -> i32 {
    let job_env = Arc::clone(job_env);
    let log = log.clone();
    let results = run_bounded(items, limit, move |item| {
        let job_env = Arc::clone(&job_env);
        let log = log.clone();
        async move {
            match item {
                WorkItem::Command(cmd) => run_logged(cmd, job_env, log).await,
                WorkItem::TaskRuns(group) => run_task_runs(group, job_env, log).await,
            }
        }
    })
    .await;
    aggregate_codes(&results)
}

async fn run_task_runs(group: TaskRunGroup, job_env: Arc<JobEnv>, log: JobLog) -> i32 {
    let lookup = group.clone();
    let commands = match tokio::task::spawn_blocking(move || lookup.expand()).await {
        Ok(Ok(commands)) => commands,
        Ok(Err(err)) => {
            log.emit(&format!(
                "ERROR: ses-{} task-run discovery failed: {err}",
                group.session
            ));
            return INTERNAL_FAILURE_EXIT_CODE;
        }
        Err(err) => {
            log.emit(&format!(
                "ERROR: ses-{} task-run discovery panicked: {err}",
                group.session
            ));
            return INTERNAL_FAILURE_EXIT_CODE;
        }
    };

    log.emit(&format!(
        "ses-{}: {} task-run unit(s) ready (limit {})",
        group.session,
        commands.len(),
        group.limit
    ));

    let results = run_bounded(commands, group.limit, move |cmd| {
        run_logged(cmd, Arc::clone(&job_env), log.clone())
    })
    .await;
    aggregate_codes(&results)
}

/// Run one leaf command, streaming its combined output into the log
/// between start and end markers. Returns the exit code; a process killed
/// by a signal reports `128 + signal`.
pub async fn run_logged(cmd: CommandSpec, job_env: Arc<JobEnv>, log: JobLog) -> i32 {
    log.start(&cmd.label);

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .envs(job_env.vars().iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            log.emit(&format!("ERROR: failed to launch {}: {err}", cmd.program));
            log.end(&cmd.label, SPAWN_FAILURE_EXIT_CODE);
            return SPAWN_FAILURE_EXIT_CODE;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (_, _, status) = tokio::join!(
        forward_lines(stdout, &log),
        forward_lines(stderr, &log),
        child.wait()
    );

    let code = match status {
        Ok(status) => exit_code(status),
        Err(err) => {
            log.emit(&format!("ERROR: failed to wait for {}: {err}", cmd.program));
            INTERNAL_FAILURE_EXIT_CODE
        }
    };
    log.end(&cmd.label, code);
    code
}

async fn forward_lines<R>(reader: Option<R>, log: &JobLog)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                log.emit(&String::from_utf8_lossy(&buf));
            }
            Err(err) => {
                warn!(identity = log.identity(), %err, "output stream read failed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(INTERNAL_FAILURE_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(INTERNAL_FAILURE_EXIT_CODE)
}
