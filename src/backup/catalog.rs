use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backup::allocator::LOCAL_SUFFIX;
use crate::model::{BackupRecord, Target};

/// Read-only view over the dump root.
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
}

impl BackupCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backup directories, newest first. A missing or unreadable root yields an empty list.
    pub fn list(&self) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable catalog entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !name.contains('_') {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                let environment = if name.ends_with(LOCAL_SUFFIX) {
                    Target::Local
                } else {
                    Target::Cloud
                };
                Some(BackupRecord {
                    name,
                    path: entry.into_path(),
                    created_at: DateTime::<Local>::from(modified),
                    environment,
                })
            })
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
        records
    }

    pub fn latest(&self) -> Option<BackupRecord> {
        self.list().into_iter().next()
    }
}
