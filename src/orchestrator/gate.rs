//! Idempotency gate over per-subject completion markers.
//!
//! A marker is an empty file whose existence is the only completion
//! signal. It is written atomically, so a crash leaves either no marker or
//! the final one.

use std::path::Path;

use tracing::info;

use crate::persist::write_atomic;
use crate::{AppError, Result};

/// Whether the subject owning `marker` has already finished.
#[must_use]
pub fn is_complete(marker: &Path) -> bool {
    marker.is_file()
}

/// Record successful completion.
///
/// # Errors
///
/// Returns `AppError::Marker` if the marker cannot be written.
pub fn mark_complete(marker: &Path) -> Result<()> {
    write_atomic(marker, b"")
        .map_err(|err| AppError::Marker(format!("{}: {err}", marker.display())))?;
    info!(marker = %marker.display(), "completion marker written");
    Ok(())
}
