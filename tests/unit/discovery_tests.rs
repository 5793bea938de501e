//! Session probing and cached discovery.

use std::path::Path;

use prepflow::config::RawDataConfig;
use prepflow::discovery::{discover, probe_subject, session_has_raw, Freshness};
use prepflow::models::Subject;
use prepflow::GlobalConfig;

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

fn add_raw(config: &GlobalConfig, subject: &str, session: &str) {
    let dir = config.raw_session_dir(subject, session).unwrap();
    touch(&dir.join("1-T1w").join("DICOM").join("IM0001.dcm"));
}

fn subjects(ids: &[&str]) -> Vec<Subject> {
    ids.iter().map(|id| Subject::new(*id)).collect()
}

#[test]
fn raw_file_must_sit_under_marker_component() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = RawDataConfig::default();

    touch(&tmp.path().join("series").join("IM0001.dcm"));
    assert!(!session_has_raw(tmp.path(), &raw).unwrap());

    touch(&tmp.path().join("series").join("resources").join("DICOM").join("files").join("IM.DCM"));
    assert!(session_has_raw(tmp.path(), &raw).unwrap());
}

#[test]
fn raw_file_requires_extension() {
    let tmp = tempfile::tempdir().unwrap();
    touch(&tmp.path().join("DICOM").join("notes.txt"));
    assert!(!session_has_raw(tmp.path(), &RawDataConfig::default()).unwrap());
}

#[test]
fn raw_walk_respects_depth_cap() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = RawDataConfig {
        max_depth: 2,
        ..RawDataConfig::default()
    };
    touch(&tmp.path().join("a").join("b").join("c").join("DICOM").join("IM.dcm"));
    assert!(!session_has_raw(tmp.path(), &raw).unwrap());

    touch(&tmp.path().join("a").join("b").join("DICOM").join("IM.dcm"));
    assert!(session_has_raw(tmp.path(), &raw).unwrap());
}

#[test]
fn default_depth_lists_files_one_level_below_cap() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = RawDataConfig::default();
    let deep = tmp.path().join("a").join("b").join("c").join("d").join("e");
    touch(&deep.join("f").join("DICOM").join("IM.dcm"));
    assert!(!session_has_raw(tmp.path(), &raw).unwrap());

    touch(&deep.join("DICOM").join("IM.dcm"));
    assert!(session_has_raw(tmp.path(), &raw).unwrap());
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(unix)]
#[test]
fn unreadable_subdirectory_does_not_hide_raw_data() {
    if running_as_root() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let locked = tmp.path().join("0-locked");
    std::fs::create_dir(&locked).unwrap();
    touch(&tmp.path().join("9-bold").join("DICOM").join("IM.dcm"));
    set_mode(&locked, 0o000);

    let found = session_has_raw(tmp.path(), &RawDataConfig::default());
    set_mode(&locked, 0o755);
    assert!(found.unwrap());
}

#[cfg(unix)]
#[test]
fn unreadable_scan_root_is_discovery_error() {
    if running_as_root() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let scans = tmp.path().join("scans");
    touch(&scans.join("DICOM").join("IM.dcm"));
    set_mode(&scans, 0o000);

    let result = session_has_raw(&scans, &RawDataConfig::default());
    set_mode(&scans, 0o755);
    assert!(matches!(result, Err(prepflow::AppError::Discovery(_))));
}

#[cfg(unix)]
#[test]
fn scan_error_downgrades_to_absent_without_aborting_discovery() {
    if running_as_root() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "01");
    add_raw(&config, "1001", "02");
    add_raw(&config, "2002", "01");
    let blocked = config.raw_session_dir("1001", "01").unwrap();
    set_mode(&blocked, 0o000);

    let found = discover(&config, &subjects(&["1001", "2002"]), true);
    set_mode(&blocked, 0o755);

    let found = found.unwrap();
    assert_eq!(found.cache.sessions_for(&Subject::new("1001")), ["02"]);
    assert_eq!(found.cache.sessions_for(&Subject::new("2002")), ["01"]);
}

#[test]
fn missing_scan_dir_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(!session_has_raw(&tmp.path().join("nope"), &RawDataConfig::default()).unwrap());
}

#[test]
fn subject_scan_reports_sessions_with_raw_data() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "02");
    assert_eq!(probe_subject(&config, &Subject::new("1001")), vec!["02"]);
}

#[test]
fn subject_scan_falls_back_to_existing_output() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    std::fs::create_dir_all(config.session_output_dir("1001", "01")).unwrap();
    assert_eq!(probe_subject(&config, &Subject::new("1001")), vec!["01"]);
}

#[test]
fn fallback_is_not_used_when_raw_data_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "02");
    std::fs::create_dir_all(config.session_output_dir("1001", "01")).unwrap();
    assert_eq!(probe_subject(&config, &Subject::new("1001")), vec!["02"]);
}

#[test]
fn discover_builds_cache_and_projection() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "01");
    add_raw(&config, "1001", "02");
    add_raw(&config, "2002", "02");

    let found = discover(&config, &subjects(&["1001", "2002", "3003"]), false).unwrap();
    assert_eq!(found.freshness, Freshness::Rebuilt);
    assert_eq!(found.cache.sessions_for(&Subject::new("1001")), ["01", "02"]);
    assert!(found.cache.sessions_for(&Subject::new("3003")).is_empty());
    assert!(config.cache_path().is_file());
    assert_eq!(
        std::fs::read_to_string(config.designated_list_path()).unwrap(),
        "1001\n2002\n"
    );
}

#[test]
fn cached_result_is_reused_until_rescan() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    let roster = subjects(&["1001"]);
    add_raw(&config, "1001", "01");
    discover(&config, &roster, false).unwrap();

    add_raw(&config, "1001", "02");
    let reused = discover(&config, &roster, false).unwrap();
    assert_eq!(reused.freshness, Freshness::Reused);
    assert_eq!(reused.cache.sessions_for(&Subject::new("1001")), ["01"]);

    let rescanned = discover(&config, &roster, true).unwrap();
    assert_eq!(rescanned.freshness, Freshness::Rebuilt);
    assert_eq!(rescanned.cache.sessions_for(&Subject::new("1001")), ["01", "02"]);
}

#[test]
fn new_roster_entries_extend_the_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "01");
    add_raw(&config, "2002", "01");
    discover(&config, &subjects(&["1001"]), false).unwrap();

    let found = discover(&config, &subjects(&["1001", "2002"]), false).unwrap();
    assert_eq!(found.freshness, Freshness::Extended);
    assert_eq!(found.cache.len(), 2);
}

#[test]
fn corrupt_cache_triggers_rescan() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    add_raw(&config, "1001", "01");
    touch(&config.cache_path());
    std::fs::write(config.cache_path(), "not json").unwrap();

    let found = discover(&config, &subjects(&["1001"]), false).unwrap();
    assert_eq!(found.freshness, Freshness::Rebuilt);
    assert_eq!(found.cache.sessions_for(&Subject::new("1001")), ["01"]);
}

#[test]
fn fresh_scan_never_loses_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let config = GlobalConfig::for_base_dir(tmp.path()).unwrap();
    let roster = subjects(&["1001"]);
    add_raw(&config, "1001", "02");
    let before = discover(&config, &roster, true).unwrap();

    add_raw(&config, "1001", "01");
    let after = discover(&config, &roster, true).unwrap();
    for session in before.cache.sessions_for(&Subject::new("1001")) {
        assert!(after
            .cache
            .sessions_for(&Subject::new("1001"))
            .contains(session));
    }
}
