//! Persisted subject to present-session mapping.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::Subject;
use crate::persist::write_atomic;
use crate::{AppError, Result};

/// Snapshot of which sessions had data when each subject was scanned.
///
/// Serialized as a pretty-printed JSON object keyed by subject so the file
/// stays human-diffable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryCache {
    sessions: BTreeMap<Subject, Vec<String>>,
}

impl DiscoveryCache {
    /// Record the present sessions for a subject, replacing any prior entry.
    pub fn insert(&mut self, subject: Subject, mut sessions: Vec<String>) {
        sessions.sort();
        sessions.dedup();
        self.sessions.insert(subject, sessions);
    }

    /// Whether the subject has an entry (possibly empty).
    #[must_use]
    pub fn contains(&self, subject: &Subject) -> bool {
        self.sessions.contains_key(subject)
    }

    /// Present sessions for a subject; empty when unknown.
    #[must_use]
    pub fn sessions_for(&self, subject: &Subject) -> &[String] {
        match self.sessions.get(subject) {
            Some(sessions) => sessions,
            None => &[],
        }
    }

    /// Number of subjects with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no subject has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate entries in subject order.
    pub fn iter(&self) -> impl Iterator<Item = (&Subject, &[String])> {
        self.sessions.iter().map(|(s, v)| (s, v.as_slice()))
    }

    /// Subjects holding `session`, in sorted order.
    #[must_use]
    pub fn subjects_with(&self, session: &str) -> Vec<Subject> {
        self.sessions
            .iter()
            .filter(|(_, v)| v.iter().any(|s| s == session))
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Load a cache file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Cache(format!("cannot read {}: {err}", path.display())))?;
        let cache: Self = serde_json::from_str(&raw)?;
        Ok(Some(cache))
    }

    /// Atomically persist the cache.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` on serialization failure or `AppError::Io`
    /// if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_atomic(path, json.as_bytes())
    }

    /// Write the subjects holding `session`, one per line.
    ///
    /// The projection is derived data for downstream reporting and is
    /// regenerated from the cache on every call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn write_projection(&self, session: &str, path: &Path) -> Result<()> {
        let body: String = self
            .subjects_with(session)
            .iter()
            .map(|s| format!("{s}\n"))
            .collect();
        write_atomic(path, body.as_bytes())
    }
}
