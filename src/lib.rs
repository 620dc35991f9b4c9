//! Backup and restore orchestration for a local or hosted PostgreSQL database.
//!
//! Backups are four SQL artifacts (roles, schema, data, storage policies) produced by the
//! PostgreSQL client tools into a timestamped directory; restores replay any subset of them.

pub mod backup;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod flight;
pub mod model;
pub mod progress;
pub mod restore;
pub mod runner;
pub mod target;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use engine::Engine;
pub use errors::{EngineError, Result};
pub use model::{ArtifactKind, BackupRecord, ConnectionDescriptor, Target};
