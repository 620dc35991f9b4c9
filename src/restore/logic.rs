// pgsnap/src/restore/logic.rs
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup::BackupOrchestrator;
use crate::backup::logic::check_stop;
use crate::config::{AppConfig, ToolsConfig};
use crate::discovery::InstanceDiscovery;
use crate::errors::{EngineError, OperationKind, Result, StepFailure};
use crate::flight::SingleFlight;
use crate::model::{ArtifactKind, StepResult, Target};
use crate::progress::{LogLevel, Observer, ProgressTracker, ScaledObserver};
use crate::restore::db_restore::restore_command;
use crate::runner::{ObserverSink, StepRunner, step_result};
use crate::target::{ResolvedTarget, resolve_target};
use tokio_util::sync::CancellationToken;

/// Share of the progress range reserved for the safety backup.
const AUTO_BACKUP_SPAN: f64 = 30.0;

/// Which artifacts to restore and how to react to failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSelection {
    /// Always iterated in pipeline order, whatever order kinds were added in.
    pub kinds: BTreeSet<ArtifactKind>,
    pub auto_backup_first: bool,
    pub continue_on_step_error: bool,
    /// Let the data step run past errors such as duplicate keys.
    pub skip_conflicts: bool,
}

impl RestoreSelection {
    /// A strict selection of `kinds`: no safety backup, first failure aborts.
    pub fn of<I: IntoIterator<Item = ArtifactKind>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            auto_backup_first: false,
            continue_on_step_error: false,
            skip_conflicts: false,
        }
    }

    /// Everything, best effort, with a safety backup first.
    pub fn all() -> Self {
        Self {
            kinds: ArtifactKind::ALL.into_iter().collect(),
            auto_backup_first: true,
            continue_on_step_error: true,
            skip_conflicts: true,
        }
    }

    pub fn only(kind: ArtifactKind) -> Self {
        Self {
            skip_conflicts: matches!(kind, ArtifactKind::Schema | ArtifactKind::Data),
            ..Self::of([kind])
        }
    }

    pub fn with_auto_backup(mut self, enabled: bool) -> Self {
        self.auto_backup_first = enabled;
        self
    }

    pub fn with_skip_conflicts(mut self, enabled: bool) -> Self {
        self.skip_conflicts = enabled;
        self
    }

    pub fn with_continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_step_error = enabled;
        self
    }
}

/// Outcome of a restore that was not aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub target: Target,
    pub source: PathBuf,
    /// Directory of the safety backup, when one was taken.
    pub safety_backup: Option<PathBuf>,
    pub restored: Vec<ArtifactKind>,
    /// Steps that failed while continuing on error, with their error message.
    pub failed: Vec<(ArtifactKind, String)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replays a backup's artifacts into one target.
pub struct RestoreOrchestrator {
    config: AppConfig,
    tools: ToolsConfig,
    runner: Arc<dyn StepRunner>,
    discovery: Arc<dyn InstanceDiscovery>,
    backup: Arc<BackupOrchestrator>,
    flight: SingleFlight,
}

impl RestoreOrchestrator {
    pub fn new(
        config: AppConfig,
        tools: ToolsConfig,
        runner: Arc<dyn StepRunner>,
        discovery: Arc<dyn InstanceDiscovery>,
        backup: Arc<BackupOrchestrator>,
    ) -> Self {
        Self {
            config,
            tools,
            runner,
            discovery,
            backup,
            flight: SingleFlight::new(OperationKind::Restore),
        }
    }

    /// Restores every artifact, best effort, after a safety backup of the same target.
    pub async fn restore_all(
        &self,
        target: Target,
        source: &Path,
        observer: &dyn Observer,
    ) -> Result<RestoreReport> {
        self.restore(target, source, &RestoreSelection::all(), observer)
            .await
    }

    /// Restores a single artifact; any failure propagates.
    pub async fn restore_only(
        &self,
        target: Target,
        source: &Path,
        kind: ArtifactKind,
        observer: &dyn Observer,
    ) -> Result<RestoreReport> {
        self.restore(target, source, &RestoreSelection::only(kind), observer)
            .await
    }

    pub async fn restore(
        &self,
        target: Target,
        source: &Path,
        selection: &RestoreSelection,
        observer: &dyn Observer,
    ) -> Result<RestoreReport> {
        let guard = self.flight.begin()?;

        if selection.kinds.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "no artifact kind selected for restore".into(),
            ));
        }
        if !source.is_dir() {
            return Err(EngineError::ConfigInvalid(format!(
                "backup directory {} does not exist",
                source.display()
            )));
        }
        self.runner.locate(&self.tools.restore)?;
        let resolved = resolve_target(&self.config, self.discovery.as_ref(), target).await?;

        let tracker = ProgressTracker::new(observer);
        observer.log(
            &format!("🔄 Restoring {} into {}", source.display(), target),
            LogLevel::Info,
        );

        let mut safety_backup = None;
        let mut start = 0.0;
        if selection.auto_backup_first {
            observer.log("🛟 Taking a safety backup first", LogLevel::Info);
            let scaled = ScaledObserver::new(&tracker, 0.0, AUTO_BACKUP_SPAN, "Safety backup");
            match self.backup.backup_within(guard.control(), target, &scaled).await {
                Ok(path) => safety_backup = Some(path),
                Err(e) => {
                    observer.log(&format!("❌ Safety backup failed: {}", e), LogLevel::Error);
                    return Err(e);
                }
            }
            start = AUTO_BACKUP_SPAN;
        }

        let total = selection.kinds.len();
        let mut restored = Vec::new();
        let mut failed = Vec::new();
        for (index, kind) in selection.kinds.iter().copied().enumerate() {
            check_stop(guard.control(), kind)?;

            let result = self
                .run_step(
                    kind,
                    &resolved,
                    source,
                    selection.skip_conflicts,
                    guard.control().kill_token(),
                    observer,
                )
                .await;

            match result.to_error() {
                None => {
                    observer.log(&format!("✅ {} restored", kind.file_name()), LogLevel::Success);
                    restored.push(kind);
                }
                Some(_) if result.failure == Some(StepFailure::Killed) => {
                    return Err(EngineError::Cancelled(format!(
                        "restore terminated during the {} step",
                        kind
                    )));
                }
                Some(err) if selection.continue_on_step_error => {
                    tracing::warn!(%kind, error = %err, "restore step failed, continuing");
                    observer.log(
                        &format!("⚠️ {} failed, continuing: {}", kind.file_name(), err),
                        LogLevel::Warning,
                    );
                    failed.push((kind, err.to_string()));
                }
                Some(err) => {
                    tracing::warn!(%kind, error = %err, "restore step failed, aborting");
                    observer.log(&format!("❌ {}", err), LogLevel::Error);
                    return Err(err);
                }
            }
            tracker.step(start, index + 1, total, kind.file_name());
        }

        let report = RestoreReport {
            target,
            source: source.to_path_buf(),
            safety_backup,
            restored,
            failed,
        };
        if report.is_complete() {
            observer.log("✅ Restore completed", LogLevel::Success);
        } else {
            observer.log(
                &format!("⚠️ Restore completed with {} failed step(s)", report.failed.len()),
                LogLevel::Warning,
            );
        }
        tracing::info!(%target, restored = report.restored.len(), failed = report.failed.len(), "restore finished");
        Ok(report)
    }

    async fn run_step(
        &self,
        kind: ArtifactKind,
        resolved: &ResolvedTarget,
        source: &Path,
        skip_conflicts: bool,
        kill: &CancellationToken,
        observer: &dyn Observer,
    ) -> StepResult {
        let file = kind.path_in(source);
        if !file.is_file() {
            return StepResult {
                kind,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                failure: Some(StepFailure::MissingArtifact(file)),
            };
        }

        observer.log(&format!("📥 Restoring {}...", kind), LogLevel::Info);
        let command = restore_command(kind, resolved, &self.tools, &file, skip_conflicts);
        tracing::info!(%kind, file = %file.display(), "restore step starting");
        let outcome = self
            .runner
            .run_streaming(&command, &ObserverSink(observer), kill)
            .await;
        step_result(kind, outcome)
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    pub fn stop(&self) -> bool {
        self.flight.stop()
    }

    pub fn kill(&self) -> bool {
        self.flight.kill()
    }
}
