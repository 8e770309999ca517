//! Error types for jstd-phantom

use crate::types::{AttemptPhase, ProcessKind};
use thiserror::Error;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Harness error types
///
/// Test failures and malformed reports are not errors: they travel as data
/// inside a [`crate::Report`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A supervised process died or was unreachable before readiness
    #[error("{kind}: {reason}")]
    StartFailure { kind: ProcessKind, reason: String },

    /// The runner exited without producing a parseable report
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: AttemptPhase, to: AttemptPhase },
}

impl Error {
    /// Classify a spawn error by the kind of process that failed to launch.
    ///
    /// Server and browser launch errors are start failures, a runner that
    /// cannot be launched never produces a report and is a transport failure.
    pub fn from_spawn(kind: ProcessKind, err: Error) -> Self {
        match (kind, err) {
            (ProcessKind::Runner, Error::Spawn { program, source }) => {
                Error::Transport(format!("failed to spawn {}: {}", program, source))
            }
            (kind, Error::Spawn { program, source }) => Error::StartFailure {
                kind,
                reason: format!("failed to spawn {}: {}", program, source),
            },
            (_, other) => other,
        }
    }
}
