// pgsnap/src/backup/allocator.rs
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};

use crate::errors::{EngineError, Result};
use crate::model::Target;
use crate::utils::revision::{NO_REVISION, RevisionSource};

/// Suffix marking backups taken from the local instance.
pub const LOCAL_SUFFIX: &str = "_local";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<YYYYMMDD_HHMMSS>_<revision|nogit>[_local]`
pub fn backup_dir_name(at: NaiveDateTime, revision: Option<&str>, target: Target) -> String {
    let revision = revision.filter(|r| !r.is_empty()).unwrap_or(NO_REVISION);
    let suffix = match target {
        Target::Local => LOCAL_SUFFIX,
        Target::Cloud => "",
    };
    format!("{}_{}{}", at.format(TIMESTAMP_FORMAT), revision, suffix)
}

/// Creates one uniquely named directory per backup under the dump root.
#[derive(Debug, Clone)]
pub struct BackupAllocator {
    root: PathBuf,
    revision: RevisionSource,
}

impl BackupAllocator {
    pub fn new(root: impl Into<PathBuf>, revision: RevisionSource) -> Self {
        Self {
            root: root.into(),
            revision,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two calls within the same second and revision return the same directory.
    pub async fn allocate(&self, target: Target) -> Result<PathBuf> {
        let revision = self.revision.lookup().await;
        let name = backup_dir_name(Local::now().naive_local(), revision.as_deref(), target);
        let path = self.root.join(name);

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| EngineError::BackupDir {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "backup directory created");
        Ok(path)
    }
}
