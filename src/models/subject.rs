//! Subject identifiers and roster loading.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AppError, Result};

/// Opaque subject identifier taken verbatim from the roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Wrap a roster token.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log identity of the subject's job, e.g. `sub-1234`.
    #[must_use]
    pub fn job_identity(&self) -> String {
        format!("sub-{}", self.0)
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse newline-delimited roster text. Blank lines are ignored and
/// repeated identifiers keep only their first occurrence.
#[must_use]
pub fn parse_roster(text: &str) -> Vec<Subject> {
    let mut seen = HashSet::new();
    let mut subjects = Vec::new();
    for token in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if seen.insert(token) {
            subjects.push(Subject::new(token));
        } else {
            warn!(subject = token, "duplicate roster entry ignored");
        }
    }
    subjects
}

/// Read the roster file once at startup.
///
/// # Errors
///
/// Returns `AppError::Roster` if the file cannot be read.
pub fn read_roster(path: &Path) -> Result<Vec<Subject>> {
    let text = fs::read_to_string(path)
        .map_err(|err| AppError::Roster(format!("cannot read {}: {err}", path.display())))?;
    Ok(parse_roster(&text))
}
