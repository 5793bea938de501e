//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Roster file missing or unreadable.
    Roster(String),
    /// Session probing failure for a single subject/session pair.
    Discovery(String),
    /// Discovery cache could not be read, parsed, or written.
    Cache(String),
    /// A required external executable is not reachable.
    Toolchain(String),
    /// An external command could not be launched.
    Spawn(String),
    /// Shared job log could not be opened or appended to.
    Log(String),
    /// Completion marker could not be written.
    Marker(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Roster(msg) => write!(f, "roster: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery: {msg}"),
            Self::Cache(msg) => write!(f, "cache: {msg}"),
            Self::Toolchain(msg) => write!(f, "toolchain: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Log(msg) => write!(f, "log: {msg}"),
            Self::Marker(msg) => write!(f, "marker: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Cache(format!("invalid cache document: {err}"))
    }
}
