//! Values threaded from startup through scheduler, job, and stage.

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::discovery::DiscoveryCache;
use crate::joblog::{JobLog, LogSink};

/// Immutable per-invocation state shared by every job.
#[derive(Clone)]
pub struct RunContext {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Discovery result read once before any job starts.
    pub cache: Arc<DiscoveryCache>,
    /// Shared log sink.
    pub sink: Arc<dyn LogSink>,
}

impl RunContext {
    /// Bundle the startup values.
    #[must_use]
    pub fn new(config: GlobalConfig, cache: DiscoveryCache, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            sink,
        }
    }

    /// Log handle for `identity`.
    #[must_use]
    pub fn job_log(&self, identity: impl Into<String>) -> JobLog {
        JobLog::new(identity, Arc::clone(&self.sink))
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .field("subjects", &self.cache.len())
            .finish_non_exhaustive()
    }
}
