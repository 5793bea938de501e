//! Read-only progress report from completion markers and the discovery cache.

use serde::Serialize;

use crate::config::GlobalConfig;
use crate::discovery::DiscoveryCache;
use crate::models::Subject;
use crate::orchestrator::gate;

/// Where a subject stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    /// Completion marker present.
    Complete,
    /// Sessions known, no marker yet.
    Pending,
    /// Scanned, no session had data.
    NoSessions,
    /// Not in the discovery cache.
    Unscanned,
}

/// One roster entry in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectStatus {
    /// Subject identifier.
    pub subject: Subject,
    /// Present sessions according to the cache.
    pub sessions: Vec<String>,
    /// Derived state.
    pub state: SubjectState,
}

/// Classify every roster subject. The marker wins over the cache.
#[must_use]
pub fn collect(
    config: &GlobalConfig,
    subjects: &[Subject],
    cache: Option<&DiscoveryCache>,
) -> Vec<SubjectStatus> {
    subjects
        .iter()
        .map(|subject| {
            let sessions = cache
                .map(|c| c.sessions_for(subject).to_vec())
                .unwrap_or_default();
            let state = if gate::is_complete(&config.marker_path(subject.as_str())) {
                SubjectState::Complete
            } else if !cache.is_some_and(|c| c.contains(subject)) {
                SubjectState::Unscanned
            } else if sessions.is_empty() {
                SubjectState::NoSessions
            } else {
                SubjectState::Pending
            };
            SubjectStatus {
                subject: subject.clone(),
                sessions,
                state,
            }
        })
        .collect()
}
