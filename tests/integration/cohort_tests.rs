//! End-to-end cohort runs over a fixture project tree.

use prepflow::orchestrator::{run_cohort, RunOptions};
use prepflow::AppError;

use super::test_helpers::{add_raw, add_task_run, test_config, write_roster};

fn log_text(config: &prepflow::GlobalConfig) -> String {
    std::fs::read_to_string(config.log_path()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_pending_and_skips_completed_subjects() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_roster(&config, &["A", "B"]);
    add_raw(&config, "A", "01");
    add_task_run(&config, "A", "01", "rest", "1");
    std::fs::create_dir_all(config.subject_output_dir("B")).unwrap();
    std::fs::write(config.marker_path("B"), b"").unwrap();

    let summary = run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.already_complete, 1);
    assert_eq!(summary.failed, 0);
    assert!(config.marker_path("A").is_file());

    let log = log_text(&config);
    assert!(log.contains("[sub-A] === START process ses-01 task-rest run-1 ==="));
    assert!(log.contains("[sub-A] processed rest 1"));
    assert!(log.contains("[sub-A] === END sub-A STATUS=OK ==="));
    assert!(log.contains("[sub-B] Subject B already complete, skipping"));
    assert!(!log.contains("[sub-B] === START"));
    assert!(log.contains("[prepflow] Run finished: completed=1 already_complete=1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_run_does_no_work() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_roster(&config, &["A", "B"]);
    add_raw(&config, "A", "01");
    add_raw(&config, "B", "02");

    let first = run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(first.completed, 2);
    let before = log_text(&config).lines().count();

    let second = run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.already_complete, 2);

    let log = log_text(&config);
    let new_lines: Vec<&str> = log.lines().skip(before).collect();
    assert!(new_lines.iter().all(|l| !l.contains("=== START")));
}

#[tokio::test]
async fn subject_without_sessions_gets_no_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_roster(&config, &["C"]);

    let summary = run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.no_sessions, 1);
    assert!(!summary.has_failures());
    assert!(!config.marker_path("C").exists());
    assert!(log_text(&config).contains("[sub-C] Skipping sub-C: no sessions present"));
}

#[tokio::test]
async fn failing_stage_leaves_subject_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.commands.prep = vec!["sh".into(), "-c".into(), "exit 5".into()];
    write_roster(&config, &["A"]);
    add_raw(&config, "A", "01");

    let summary = run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert!(summary.has_failures());
    assert!(!config.marker_path("A").exists());
    assert!(log_text(&config).contains("[sub-A] === END sub-A STATUS=FAIL rc=5 ==="));
}

#[tokio::test]
async fn rescan_picks_up_new_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.commands.prep = vec!["sh".into(), "-c".into(), "exit 1".into()];
    write_roster(&config, &["A"]);
    add_raw(&config, "A", "01");
    run_cohort(config.clone(), RunOptions::default())
        .await
        .unwrap();

    add_raw(&config, "A", "02");
    config.commands.prep = vec!["sh".into(), "-c".into(), "echo prep {session}".into()];
    let summary = run_cohort(config.clone(), RunOptions { force_rescan: true })
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    let log = log_text(&config);
    assert!(log.contains("[sub-A] prep 02"));
    assert_eq!(
        std::fs::read_to_string(config.designated_list_path()).unwrap(),
        "A\n"
    );
}

#[tokio::test]
async fn missing_roster_is_startup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let err = run_cohort(config, RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, AppError::Roster(_)));
}
