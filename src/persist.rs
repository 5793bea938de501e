//! Atomic file writing.
//!
//! Content is written to a temporary file in the destination directory and
//! renamed into place with `tempfile::NamedTempFile::persist()`, so readers
//! observe either the previous file or the complete new one.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Atomically replace `path` with `content`, creating parent directories.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory, temporary file, or rename fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist file to {}: {err}", path.display()))
    })?;

    Ok(())
}
