//! Error types for the test runner
//!
//! Only configuration problems and engine invariant violations surface as
//! [`Error`]. Operation failures are data: they end up as `fail`/`error`
//! verdicts inside the session, never as an `Err` from the engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test runner
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Failed to read configuration '{path}': {error}")]
    ConfigRead { path: PathBuf, error: String },

    #[error("Invalid configuration file '{path}': {error}")]
    ConfigParse { path: PathBuf, error: String },

    #[error("Include cycle detected at '{0}'")]
    IncludeCycle(PathBuf),

    #[error("Configuration is invalid:\n{}", .0.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n"))]
    InvalidPlan(Vec<String>),

    #[error("Test group not found: {0}")]
    UnknownGroup(String),

    #[error("Credential not found: {0}")]
    UnknownCredential(String),

    #[error("Invalid settings file: {0}")]
    SettingsParse(String),

    // === Engine Errors ===
    #[error("Engine invariant violated: {0}")]
    Engine(String),

    #[error("Invalid group transition for '{group}': {from} -> {to}")]
    InvalidTransition {
        group: String,
        from: String,
        to: String,
    },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration read error
    pub fn config_read(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::ConfigRead {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Create a configuration parse error
    pub fn config_parse(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Whether this error was raised before any remote call could happen
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ConfigRead { .. }
                | Error::ConfigParse { .. }
                | Error::IncludeCycle(_)
                | Error::InvalidPlan(_)
                | Error::UnknownGroup(_)
                | Error::UnknownCredential(_)
                | Error::SettingsParse(_)
                | Error::Yaml(_)
        )
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_configuration() {
            2
        } else {
            3
        }
    }
}
