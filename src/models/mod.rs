//! Domain models shared by discovery, chain building, and scheduling.

pub mod job;
pub mod subject;
pub mod task_run;

pub use job::{JobOutcome, RunSummary};
pub use subject::Subject;
pub use task_run::TaskRunUnit;
