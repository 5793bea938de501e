#![forbid(unsafe_code)]

//! `prepflow` batch preprocessing orchestrator binary.
//!
//! Loads configuration for a project base directory, discovers which
//! sessions each rostered subject has, and runs the per-subject chains
//! under the configured concurrency bounds.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use prepflow::discovery::{self, DiscoveryCache};
use prepflow::models::subject::read_roster;
use prepflow::orchestrator::{run_cohort, RunOptions};
use prepflow::status::{self, SubjectState};
use prepflow::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "prepflow", about = "Per-subject preprocessing orchestrator", version, long_about = None)]
struct Cli {
    /// Project base directory; every other path is derived from it.
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Optional TOML file overriding the pipeline layout.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover sessions and run every pending subject.
    Run {
        /// Ignore the discovery cache and rescan storage.
        #[arg(long)]
        rescan: bool,
    },
    /// Discover sessions only and print the mapping as JSON.
    Discover {
        /// Ignore the discovery cache and rescan storage.
        #[arg(long)]
        rescan: bool,
    },
    /// Report per-subject progress from markers and the cache.
    Status,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = GlobalConfig::load(&args.base_dir, args.config.as_deref())?;
    info!(base_dir = %config.base_dir.display(), "configuration loaded");

    match args.command {
        Command::Run { rescan } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
            .block_on(run(config, rescan)),
        Command::Discover { rescan } => {
            let subjects = read_roster(&config.roster_path())?;
            let found = discovery::discover(&config, &subjects, rescan)?;
            let json = serde_json::to_string_pretty(&found.cache)?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let subjects = read_roster(&config.roster_path())?;
            let cache = DiscoveryCache::load(&config.cache_path()).unwrap_or_default();
            print_status(&status::collect(&config, &subjects, cache.as_ref()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: GlobalConfig, rescan: bool) -> Result<ExitCode> {
    let summary = run_cohort(
        config,
        RunOptions {
            force_rescan: rescan,
        },
    )
    .await?;

    println!(
        "completed={} already_complete={} no_sessions={} failed={}",
        summary.completed, summary.already_complete, summary.no_sessions, summary.failed
    );

    if summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_status(rows: &[status::SubjectStatus]) {
    let mut complete = 0usize;
    let mut pending = 0usize;
    for row in rows {
        let state = match row.state {
            SubjectState::Complete => {
                complete += 1;
                "complete"
            }
            SubjectState::Pending => {
                pending += 1;
                "pending"
            }
            SubjectState::NoSessions => "no-sessions",
            SubjectState::Unscanned => "unscanned",
        };
        println!(
            "{}\t{state}\t{}",
            row.subject.job_identity(),
            row.sessions.join(",")
        );
    }
    println!(
        "total={} complete={complete} pending={pending} other={}",
        rows.len(),
        rows.len() - complete - pending
    );
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
