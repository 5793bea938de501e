//! Shared, append-only job log.
//!
//! Every line has the shape `[<timestamp>] [<job-identity>] <message>`.
//! Jobs never write to the sink directly: each owns a [`JobLog`] that
//! formats complete lines, so concurrent jobs interleave only at line
//! granularity.

pub mod writer;

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::warn;

pub use writer::SharedLogWriter;

/// Timestamp layout used in every log line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Appends complete lines to a persistent store.
///
/// Implementations must write each line in one piece; they are shared
/// across tasks via [`Arc`].
pub trait LogSink: Send + Sync {
    /// Append one line. `line` carries no trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn append_line(&self, line: &str) -> crate::Result<()>;
}

/// Render one log line.
#[must_use]
pub fn format_line(timestamp: DateTime<Local>, identity: &str, message: &str) -> String {
    format!(
        "[{}] [{identity}] {message}",
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Start marker for a unit of work.
#[must_use]
pub fn start_marker(unit: &str) -> String {
    format!("=== START {unit} ===")
}

/// Success end marker for a unit of work.
#[must_use]
pub fn end_ok_marker(unit: &str) -> String {
    format!("=== END {unit} STATUS=OK ===")
}

/// Failure end marker for a unit of work.
#[must_use]
pub fn end_fail_marker(unit: &str, code: i32) -> String {
    format!("=== END {unit} STATUS=FAIL rc={code} ===")
}

/// Per-job handle that stamps lines with a timestamp and the job identity.
#[derive(Clone)]
pub struct JobLog {
    identity: String,
    sink: Arc<dyn LogSink>,
}

impl JobLog {
    /// Bind a job identity to the shared sink.
    #[must_use]
    pub fn new(identity: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            identity: identity.into(),
            sink,
        }
    }

    /// Identity printed in every line.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Append one message. Embedded line breaks are split into separate
    /// lines. Write failures are reported through tracing and otherwise
    /// ignored so a full disk cannot wedge a running job.
    pub fn emit(&self, message: &str) {
        for part in message.split('\n') {
            let part = part.strip_suffix('\r').unwrap_or(part);
            let line = format_line(Local::now(), &self.identity, part);
            if let Err(err) = self.sink.append_line(&line) {
                warn!(identity = %self.identity, %err, "failed to append job log line");
            }
        }
    }

    /// Write a start marker.
    pub fn start(&self, unit: &str) {
        self.emit(&start_marker(unit));
    }

    /// Write the end marker matching `code`.
    pub fn end(&self, unit: &str, code: i32) {
        if code == 0 {
            self.emit(&end_ok_marker(unit));
        } else {
            self.emit(&end_fail_marker(unit, code));
        }
    }
}

impl std::fmt::Debug for JobLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLog")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
