//! Job orchestration.
//!
//! Covers the bounded fan-out primitive, per-job environment bootstrap,
//! logged chain execution, the idempotency gate, and the subject-level
//! scheduler.

pub mod bootstrap;
pub mod cohort;
pub mod context;
pub mod executor;
pub mod gate;
pub mod group;
pub mod scheduler;

pub use cohort::{run_cohort, RunOptions};
pub use context::RunContext;
pub use executor::{wrap, LoggedJob};
pub use scheduler::Job;
