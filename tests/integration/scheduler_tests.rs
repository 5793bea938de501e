//! Subject-level admission and failure isolation.

use std::sync::{Arc, Mutex};

use prepflow::chain::{Chain, CommandSpec, Stage};
use prepflow::discovery::DiscoveryCache;
use prepflow::joblog::LogSink;
use prepflow::models::Subject;
use prepflow::orchestrator::group::SlotGauge;
use prepflow::orchestrator::scheduler::{run, run_with_gauge};
use prepflow::orchestrator::{Job, RunContext};

use super::test_helpers::{memory_context, test_config};

fn job(id: &str, script: &str) -> Job {
    let subject = Subject::new(id);
    let chain = Chain {
        subject: subject.clone(),
        stages: vec![Stage::Run(CommandSpec {
            label: format!("work {id}"),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        })],
    };
    Job::new(subject, chain)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let (ctx, _sink) = memory_context(test_config(tmp.path()));
    let jobs: Vec<Job> = (0..6).map(|i| job(&i.to_string(), "sleep 0.1")).collect();
    let gauge = Arc::new(SlotGauge::default());

    let summary = run_with_gauge(&ctx, jobs, 2, Arc::clone(&gauge)).await;
    assert_eq!(summary.completed, 6);
    assert!(summary.peak_concurrency <= 2, "{summary:?}");
    assert!(summary.peak_concurrency >= 1);
    assert_eq!(gauge.active(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_job_does_not_cancel_others() {
    let tmp = tempfile::tempdir().unwrap();
    let (ctx, sink) = memory_context(test_config(tmp.path()));
    let jobs = vec![
        job("a", "exit 9"),
        job("b", "sleep 0.05; echo ok"),
        job("c", "echo ok"),
    ];

    let summary = run(&ctx, jobs, 3).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 2);
    assert!(summary.has_failures());
    assert!(sink
        .lines_for("sub-a")
        .contains(&"=== END sub-a STATUS=FAIL rc=9 ===".to_owned()));
    assert!(sink
        .lines_for("sub-b")
        .contains(&"=== END sub-b STATUS=OK ===".to_owned()));
}

#[tokio::test]
async fn single_slot_admits_in_submission_order() {
    let tmp = tempfile::tempdir().unwrap();
    let (ctx, sink) = memory_context(test_config(tmp.path()));
    let ids = ["3", "1", "2"];
    let jobs: Vec<Job> = ids.iter().map(|id| job(id, "true")).collect();

    let summary = run(&ctx, jobs, 1).await;
    assert_eq!(summary.peak_concurrency, 1);

    let starts: Vec<String> = sink
        .lines()
        .into_iter()
        .filter_map(|line| {
            line.split_once("=== START sub-")
                .map(|(_, rest)| rest.trim_end_matches(" ===").to_owned())
        })
        .collect();
    assert_eq!(starts, ids);
}

#[tokio::test]
async fn empty_job_list_yields_empty_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let (ctx, _sink) = memory_context(test_config(tmp.path()));
    let summary = run(&ctx, Vec::new(), 4).await;
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.peak_concurrency, 0);
}

/// Sink that panics on one job's start marker and records everything else.
#[derive(Default)]
struct TrippingSink {
    lines: Mutex<Vec<String>>,
}

impl LogSink for TrippingSink {
    fn append_line(&self, line: &str) -> prepflow::Result<()> {
        assert!(
            !line.ends_with("[sub-boom] === START sub-boom ==="),
            "sink tripped"
        );
        self.lines.lock().unwrap().push(line.to_owned());
        Ok(())
    }
}

#[tokio::test]
async fn aborted_job_still_gets_failing_end_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(TrippingSink::default());
    let ctx = RunContext::new(
        test_config(tmp.path()),
        DiscoveryCache::default(),
        sink.clone(),
    );

    let summary = run(&ctx, vec![job("boom", "true"), job("fine", "true")], 2).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);

    let lines = sink.lines.lock().unwrap();
    let boom: Vec<&String> = lines.iter().filter(|l| l.contains("[sub-boom] ")).collect();
    assert_eq!(boom.len(), 1, "{boom:?}");
    assert!(boom[0].ends_with("=== END sub-boom STATUS=FAIL rc=1 ==="));
}
