//! Line-atomic append writer for the shared job log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use super::LogSink;
use crate::{AppError, Result};

/// Appends lines to a single file opened in append mode.
///
/// Each line is written with one `write_all` while holding the mutex, so
/// lines from concurrent jobs never split. Append mode keeps other
/// processes writing the same file from clobbering it.
#[derive(Debug)]
pub struct SharedLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl SharedLogWriter {
    /// Open (or create) the log at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Log` if the directory or file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Log(format!(
                    "failed to create log directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Log(format!("failed to open log {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for SharedLogWriter {
    fn append_line(&self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| AppError::Log("log writer mutex poisoned".to_string()))?;

        if let Err(e) = file.write_all(&buf) {
            warn!("failed to write job log line: {e}");
            return Err(AppError::Log(format!("log write failed: {e}")));
        }
        Ok(())
    }
}
