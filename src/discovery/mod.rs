//! Session discovery from filesystem state.
//!
//! A session is present for a subject when at least one qualifying raw file
//! exists under its raw-data directory, or, failing that for every session,
//! when a previous run already produced output for it. Probing errors are
//! logged and downgraded to "not present"; they never abort a pass.
//!
//! The result is persisted in a [`DiscoveryCache`] so later invocations
//! skip the scan unless a rescan is forced.

pub mod cache;
pub mod task_runs;

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{info, info_span, warn};
use walkdir::WalkDir;

use crate::config::{GlobalConfig, RawDataConfig};
use crate::models::Subject;
use crate::{AppError, Result};

pub use cache::DiscoveryCache;
pub use task_runs::discover_task_runs;

/// How the returned mapping was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Every subject was probed in this invocation.
    Rebuilt,
    /// The persisted cache covered the whole roster.
    Reused,
    /// The persisted cache was reused and newly rostered subjects were probed.
    Extended,
}

/// Discovery result handed to the chain builder.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Subject to present-session mapping.
    pub cache: DiscoveryCache,
    /// Whether the mapping came from a fresh scan.
    pub freshness: Freshness,
}

/// Whether `scan_dir` holds at least one qualifying raw file.
///
/// Cheap directory check first, then a depth-capped walk that stops at the
/// first match. Directories deeper than `raw.max_depth` are still listed
/// but not descended into. Unreadable entries below the root are skipped
/// so they cannot hide data elsewhere in the tree.
///
/// # Errors
///
/// Returns `AppError::Discovery` if `scan_dir` itself cannot be read.
pub fn session_has_raw(scan_dir: &Path, raw: &RawDataConfig) -> Result<bool> {
    if !scan_dir.is_dir() {
        return Ok(false);
    }

    for entry in WalkDir::new(scan_dir).max_depth(raw.max_depth + 2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(AppError::Discovery(format!(
                    "walk of {} failed: {err}",
                    scan_dir.display()
                )));
            }
            Err(err) => {
                warn!(scan_dir = %scan_dir.display(), %err, "unreadable entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let has_extension = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(raw.extension.as_str()));
        if !has_extension {
            continue;
        }
        let under_marker = path
            .strip_prefix(scan_dir)
            .ok()
            .and_then(Path::parent)
            .is_some_and(|rel| {
                rel.components()
                    .any(|c| c.as_os_str().to_string_lossy().contains(&raw.marker_component))
            });
        if under_marker {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Probe every configured session for one subject.
///
/// Returns labels in sorted order.
#[must_use]
pub fn probe_subject(config: &GlobalConfig, subject: &Subject) -> Vec<String> {
    let mut present = BTreeSet::new();

    for label in config.session_labels() {
        let Some(scan_dir) = config.raw_session_dir(subject.as_str(), &label) else {
            continue;
        };
        match session_has_raw(&scan_dir, &config.raw_data) {
            Ok(true) => {
                present.insert(label);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%subject, session = %label, %err, "session probe failed; treating as absent");
            }
        }
    }

    if present.is_empty() {
        for label in config.session_labels() {
            if config.session_output_dir(subject.as_str(), &label).is_dir() {
                info!(%subject, session = %label, "raw data absent; prior output found");
                present.insert(label);
            }
        }
    }

    present.into_iter().collect()
}

/// Resolve the present sessions for every subject in the roster.
///
/// With `force == false` the persisted cache is reused; subjects missing
/// from it are probed and merged in. A missing or unreadable cache file
/// triggers a full scan. The designated-session projection is rewritten on
/// every call.
///
/// # Errors
///
/// Returns `AppError::Io` if the cache or projection cannot be written.
pub fn discover(config: &GlobalConfig, subjects: &[Subject], force: bool) -> Result<Discovery> {
    let span = info_span!("discover", subjects = subjects.len(), force);
    let _guard = span.enter();

    let cache_path = config.cache_path();
    let cached = if force {
        None
    } else {
        match DiscoveryCache::load(&cache_path) {
            Ok(found) => found,
            Err(err) => {
                warn!(path = %cache_path.display(), %err, "discovery cache unreadable; rescanning");
                None
            }
        }
    };

    let (mut cache, mut freshness) = match cached {
        Some(cache) => {
            info!(path = %cache_path.display(), "loaded cached session info");
            (cache, Freshness::Reused)
        }
        None => (DiscoveryCache::default(), Freshness::Rebuilt),
    };

    let pending: Vec<&Subject> = subjects.iter().filter(|s| !cache.contains(s)).collect();
    if !pending.is_empty() {
        if freshness == Freshness::Reused {
            freshness = Freshness::Extended;
        }
        info!(count = pending.len(), "scanning subjects for available sessions");
        for (i, subject) in pending.iter().enumerate() {
            if (i + 1) % 10 == 0 {
                info!(scanned = i + 1, total = pending.len(), "scan progress");
            }
            cache.insert((*subject).clone(), probe_subject(config, subject));
        }
        cache.save(&cache_path)?;
        info!(path = %cache_path.display(), "session cache saved");
    }

    cache.write_projection(&config.designated_session, &config.designated_list_path())?;

    Ok(Discovery { cache, freshness })
}
