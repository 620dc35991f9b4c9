//! Core data model shared by discovery, the backup pipeline and the restore pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};

use crate::errors::{EngineError, StepFailure};

/// The database environment an operation acts upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Local,
    Cloud,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Target::Local),
            "cloud" => Ok(Target::Cloud),
            other => Err(EngineError::ConfigInvalid(format!(
                "unknown target '{}', expected 'local' or 'cloud'",
                other
            ))),
        }
    }
}

/// One of the four dump categories.
///
/// Declaration order is the canonical pipeline order: roles must exist before the schema that
/// references them, the schema before its data, and storage policies last. `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Roles,
    Schema,
    Data,
    StoragePolicies,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Roles,
        ArtifactKind::Schema,
        ArtifactKind::Data,
        ArtifactKind::StoragePolicies,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Roles => "roles.sql",
            ArtifactKind::Schema => "schema.sql",
            ArtifactKind::Data => "data.sql",
            ArtifactKind::StoragePolicies => "storage-policies.sql",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Roles => "roles",
            ArtifactKind::Schema => "schema",
            ArtifactKind::Data => "data",
            ArtifactKind::StoragePolicies => "storage",
        }
    }

    pub fn path_in(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roles" | "roles.sql" => Ok(ArtifactKind::Roles),
            "schema" | "schema.sql" => Ok(ArtifactKind::Schema),
            "data" | "data.sql" => Ok(ArtifactKind::Data),
            "storage" | "storage-policies" | "storage-policies.sql" => {
                Ok(ArtifactKind::StoragePolicies)
            }
            other => Err(EngineError::ConfigInvalid(format!(
                "unknown artifact kind '{}', expected roles, schema, data or storage",
                other
            ))),
        }
    }
}

/// Connection parameters for one orchestration call. Never persisted.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub is_running: bool,
}

impl ConnectionDescriptor {
    /// The negative discovery result: nothing detected, every field empty.
    pub fn not_running() -> Self {
        Self::default()
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "*****" })
            .field("database", &self.database)
            .field("is_running", &self.is_running)
            .finish()
    }
}

/// Outcome of one external step. Surfaced through the observer and the error path only.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub kind: ArtifactKind,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub failure: Option<StepFailure>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts a failed step into `EngineError::StepFailed`; `None` when it succeeded.
    pub fn to_error(&self) -> Option<EngineError> {
        self.failure.clone().map(|cause| EngineError::StepFailed {
            kind: self.kind,
            cause,
            exit_code: self.exit_code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// A backup directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    pub path: PathBuf,
    /// Modification time of the directory.
    pub created_at: DateTime<Local>,
    pub environment: Target,
}

impl BackupRecord {
    /// Canonical artifact files present in this backup, in pipeline order.
    pub fn artifacts(&self) -> Vec<ArtifactKind> {
        ArtifactKind::ALL
            .into_iter()
            .filter(|kind| kind.path_in(&self.path).is_file())
            .collect()
    }
}
