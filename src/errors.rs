use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ArtifactKind;

/// Which single-flight operation a guard protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Backup,
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup => f.write_str("backup"),
            OperationKind::Restore => f.write_str("restore"),
        }
    }
}

/// Why an external step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// The process ran and exited non-zero (or was ended by a signal).
    NonZeroExit,
    /// The process could not be started at all.
    Spawn(String),
    /// The process was terminated through the kill path.
    Killed,
    /// The artifact file to restore from does not exist.
    MissingArtifact(PathBuf),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::NonZeroExit => f.write_str("non-zero exit"),
            StepFailure::Spawn(msg) => write!(f, "failed to start: {}", msg),
            StepFailure::Killed => f.write_str("terminated"),
            StepFailure::MissingArtifact(path) => write!(f, "missing file {}", path.display()),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("A {0} is already running")]
    AlreadyRunning(OperationKind),

    #[error("{kind} step failed ({cause}, exit code {}): {stderr}", display_exit_code(.exit_code))]
    StepFailed {
        kind: ArtifactKind,
        cause: StepFailure,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Required tool '{tool}' not found in PATH")]
    ToolMissing { tool: String },

    #[error("Failed to create backup directory {path}: {source}")]
    BackupDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}
