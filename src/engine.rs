//! Wires the orchestrators, discovery and catalog over one configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backup::{BackupAllocator, BackupCatalog, BackupOrchestrator};
use crate::config::{AppConfig, ToolsConfig};
use crate::discovery::{InstanceDiscovery, StatusCommandDiscovery};
use crate::errors::Result;
use crate::model::{ConnectionDescriptor, Target};
use crate::restore::RestoreOrchestrator;
use crate::runner::{ProcessRunner, StepRunner};
use crate::target::resolve_target;
use crate::utils::connection::check_connection;
use crate::utils::revision::RevisionSource;

/// Owns everything one process needs; built once by the front end and passed around.
pub struct Engine {
    config: AppConfig,
    discovery: Arc<dyn InstanceDiscovery>,
    backup: Arc<BackupOrchestrator>,
    restore: RestoreOrchestrator,
    catalog: BackupCatalog,
}

impl Engine {
    /// Real processes, the status command for discovery and git for revisions.
    pub fn new(config: AppConfig, tools: ToolsConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(tools.kill_grace));
        let discovery = Arc::new(StatusCommandDiscovery::from_tools(&tools));
        let allocator = BackupAllocator::new(
            config.backup.dump_dir.clone(),
            RevisionSource::Git {
                program: tools.revision.clone(),
            },
        );
        Self::with_parts(config, tools, runner, discovery, allocator)
    }

    pub fn with_parts(
        config: AppConfig,
        tools: ToolsConfig,
        runner: Arc<dyn StepRunner>,
        discovery: Arc<dyn InstanceDiscovery>,
        allocator: BackupAllocator,
    ) -> Self {
        let catalog = BackupCatalog::new(allocator.root().to_path_buf());
        let backup = Arc::new(BackupOrchestrator::new(
            config.clone(),
            tools.clone(),
            runner.clone(),
            discovery.clone(),
            allocator,
        ));
        let restore = RestoreOrchestrator::new(
            config.clone(),
            tools,
            runner,
            discovery.clone(),
            backup.clone(),
        );

        Self {
            config,
            discovery,
            backup,
            restore,
            catalog,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backup(&self) -> &BackupOrchestrator {
        &self.backup
    }

    pub fn restore(&self) -> &RestoreOrchestrator {
        &self.restore
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub fn dump_dir(&self) -> &Path {
        self.catalog.root()
    }

    pub async fn discover_local(&self) -> ConnectionDescriptor {
        self.discovery.discover().await
    }

    /// Resolves `target` and opens one connection to it.
    pub async fn check_connection(&self, target: Target, limit: Duration) -> Result<bool> {
        let resolved = resolve_target(&self.config, self.discovery.as_ref(), target).await?;
        Ok(check_connection(&resolved.descriptor, limit).await)
    }

    /// Kills whatever backup or restore is in flight. Returns whether anything was running.
    pub fn kill_all(&self) -> bool {
        let restore = self.restore.kill();
        let backup = self.backup.kill();
        restore || backup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactKind;
    use crate::restore::RestoreSelection;
    use crate::test_support::{FakeRunner, FixedDiscovery, RecordingObserver, running_local};

    fn engine(root: &Path, runner: Arc<FakeRunner>) -> Engine {
        let config = AppConfig::default();
        Engine::with_parts(
            config,
            ToolsConfig::default(),
            runner,
            Arc::new(FixedDiscovery::new(running_local())),
            BackupAllocator::new(root, RevisionSource::Fixed(None)),
        )
    }

    #[tokio::test]
    async fn backup_then_restore_latest_from_catalog() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let runner = Arc::new(FakeRunner::default());
        let engine = engine(tmp.path(), runner.clone());

        let dir = engine
            .backup()
            .backup(Target::Local, &RecordingObserver::default())
            .await?;
        let latest = engine
            .catalog()
            .latest()
            .ok_or_else(|| anyhow::anyhow!("catalog is empty"))?;
        assert_eq!(latest.path, dir);
        assert_eq!(latest.environment, Target::Local);
        assert_eq!(latest.artifacts(), ArtifactKind::ALL.to_vec());

        let selection = RestoreSelection::of([ArtifactKind::Schema, ArtifactKind::Data]);
        let report = engine
            .restore()
            .restore(Target::Local, &latest.path, &selection, &RecordingObserver::default())
            .await?;
        assert!(report.is_complete());
        assert_eq!(runner.calls().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn kill_all_reports_idle_engine() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let engine = engine(tmp.path(), Arc::new(FakeRunner::default()));
        assert!(!engine.kill_all());
        assert_eq!(engine.dump_dir(), tmp.path());
        assert!(engine.discover_local().await.is_running);
        Ok(())
    }
}
