//! Job log line format and the shared append writer.

use std::sync::{Arc, Mutex};

use chrono::{Local, TimeZone};
use prepflow::joblog::{
    end_fail_marker, end_ok_marker, format_line, start_marker, JobLog, LogSink, SharedLogWriter,
};
use prepflow::AppError;

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl LogSink for Lines {
    fn append_line(&self, line: &str) -> prepflow::Result<()> {
        self.0.lock().unwrap().push(line.to_owned());
        Ok(())
    }
}

struct Broken;

impl LogSink for Broken {
    fn append_line(&self, _line: &str) -> prepflow::Result<()> {
        Err(AppError::Log("disk full".into()))
    }
}

fn strip_timestamp(line: &str) -> &str {
    // "[YYYY-MM-DD HH:MM:SS] " is 22 bytes.
    &line[22..]
}

#[test]
fn line_has_timestamp_identity_and_message() {
    let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
    assert_eq!(
        format_line(ts, "sub-1001", "hello"),
        "[2024-03-09 07:05:01] [sub-1001] hello"
    );
}

#[test]
fn markers_have_expected_shape() {
    assert_eq!(start_marker("prep ses-01"), "=== START prep ses-01 ===");
    assert_eq!(end_ok_marker("sub-1"), "=== END sub-1 STATUS=OK ===");
    assert_eq!(
        end_fail_marker("sub-1", 137),
        "=== END sub-1 STATUS=FAIL rc=137 ==="
    );
}

#[test]
fn emit_splits_multiline_messages() {
    let sink = Arc::new(Lines::default());
    let log = JobLog::new("sub-1001", sink.clone());
    log.emit("one\r\ntwo\nthree");

    let lines = sink.0.lock().unwrap();
    let bodies: Vec<&str> = lines.iter().map(|l| strip_timestamp(l)).collect();
    assert_eq!(
        bodies,
        vec!["[sub-1001] one", "[sub-1001] two", "[sub-1001] three"]
    );
}

#[test]
fn end_selects_marker_by_code() {
    let sink = Arc::new(Lines::default());
    let log = JobLog::new("sub-7", sink.clone());
    log.start("sub-7");
    log.end("sub-7", 0);
    log.end("sub-7", 3);

    let lines = sink.0.lock().unwrap();
    assert!(lines[0].ends_with("[sub-7] === START sub-7 ==="));
    assert!(lines[1].ends_with("STATUS=OK ==="));
    assert!(lines[2].ends_with("STATUS=FAIL rc=3 ==="));
}

#[test]
fn sink_failure_does_not_panic() {
    let log = JobLog::new("sub-1", Arc::new(Broken));
    log.emit("dropped");
    assert_eq!(log.identity(), "sub-1");
}

#[test]
fn writer_appends_to_existing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("logs").join("prepflow.log");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "earlier\n").unwrap();

    let writer = SharedLogWriter::open(&path).unwrap();
    writer.append_line("later").unwrap();
    assert_eq!(writer.path(), path.as_path());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
}

#[test]
fn writer_open_failure_is_log_error() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let err = SharedLogWriter::open(blocker.join("prepflow.log")).unwrap_err();
    assert!(matches!(err, AppError::Log(_)));
}
