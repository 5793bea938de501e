#![forbid(unsafe_code)]

//! Resumable, resource-bounded batch orchestrator for per-subject
//! preprocessing pipelines.

pub mod chain;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod joblog;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod status;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
