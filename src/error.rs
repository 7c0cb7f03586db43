//! Error types for the session slot, tick delivery and configuration.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::TaskKind;

/// Failures surfaced by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Another task is running: {active}")]
    AlreadyActive { active: TaskKind },
}

/// A tick could not be handed to the client (it went away).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
