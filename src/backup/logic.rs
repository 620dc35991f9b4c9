// pgsnap/src/backup/logic.rs
use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::allocator::BackupAllocator;
use crate::backup::db_dump::dump_command;
use crate::config::{AppConfig, ToolsConfig};
use crate::discovery::InstanceDiscovery;
use crate::errors::{EngineError, OperationKind, Result, StepFailure};
use crate::flight::{FlightGuard, RunControl, SingleFlight};
use crate::model::{ArtifactKind, Target};
use crate::progress::{LogLevel, Observer, ProgressTracker};
use crate::runner::{ObserverSink, StepRunner, step_result};
use crate::target::resolve_target;

/// Runs the four-step dump pipeline against one target.
pub struct BackupOrchestrator {
    config: AppConfig,
    tools: ToolsConfig,
    runner: Arc<dyn StepRunner>,
    discovery: Arc<dyn InstanceDiscovery>,
    allocator: BackupAllocator,
    flight: SingleFlight,
}

impl BackupOrchestrator {
    pub fn new(
        config: AppConfig,
        tools: ToolsConfig,
        runner: Arc<dyn StepRunner>,
        discovery: Arc<dyn InstanceDiscovery>,
        allocator: BackupAllocator,
    ) -> Self {
        Self {
            config,
            tools,
            runner,
            discovery,
            allocator,
            flight: SingleFlight::new(OperationKind::Backup),
        }
    }

    /// Dumps roles, schema, data and storage policies, in that order, into a fresh directory.
    ///
    /// Pre-flight failures (already running, missing tools, invalid configuration, local
    /// instance down) happen before the directory is created. The first failing step aborts
    /// the run; the partially written directory is left in place.
    pub async fn backup(&self, target: Target, observer: &dyn Observer) -> Result<PathBuf> {
        let guard = self.flight.begin()?;
        self.run(guard, target, observer).await
    }

    /// A backup taken on behalf of another run: stopping or killing `parent` stops it too.
    pub(crate) async fn backup_within(
        &self,
        parent: &RunControl,
        target: Target,
        observer: &dyn Observer,
    ) -> Result<PathBuf> {
        let guard = self.flight.begin_within(parent)?;
        self.run(guard, target, observer).await
    }

    async fn run(
        &self,
        guard: FlightGuard<'_>,
        target: Target,
        observer: &dyn Observer,
    ) -> Result<PathBuf> {
        for program in [&self.tools.roles_dump, &self.tools.dump] {
            self.runner.locate(program)?;
        }
        let resolved = resolve_target(&self.config, self.discovery.as_ref(), target).await?;

        observer.log(&format!("🚀 Starting {} backup", target), LogLevel::Info);
        let dir = self.allocator.allocate(target).await?;
        observer.log(
            &format!("📂 Backup directory: {}", dir.display()),
            LogLevel::Info,
        );

        let tracker = ProgressTracker::new(observer);
        let total = ArtifactKind::ALL.len();
        for (index, kind) in ArtifactKind::ALL.into_iter().enumerate() {
            check_stop(guard.control(), kind)?;

            let output = kind.path_in(&dir);
            let command = dump_command(kind, &resolved.descriptor, &self.tools, &output);
            tracing::info!(%kind, %target, file = %output.display(), "dump step starting");
            observer.log(&format!("🔍 Dumping {}...", kind), LogLevel::Info);

            let outcome = self
                .runner
                .run_streaming(&command, &ObserverSink(observer), guard.control().kill_token())
                .await;
            let result = step_result(kind, outcome);

            if let Some(err) = result.to_error() {
                if result.failure == Some(StepFailure::Killed) {
                    return Err(EngineError::Cancelled(format!(
                        "backup terminated during the {} step",
                        kind
                    )));
                }
                tracing::warn!(%kind, exit_code = ?result.exit_code, "dump step failed");
                observer.log(&format!("❌ {}", err), LogLevel::Error);
                return Err(err);
            }

            observer.log(&format!("✅ {} dumped", kind.file_name()), LogLevel::Success);
            tracker.step(0.0, index + 1, total, kind.file_name());
        }

        observer.log(
            &format!("✅ Backup completed: {}", dir.display()),
            LogLevel::Success,
        );
        tracing::info!(path = %dir.display(), %target, "backup completed");
        Ok(dir)
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    /// Clears the running flag; the run aborts before its next step.
    pub fn stop(&self) -> bool {
        self.flight.stop()
    }

    /// Stops the run and terminates its in-flight dump process.
    pub fn kill(&self) -> bool {
        self.flight.kill()
    }
}

pub(crate) fn check_stop(control: &RunControl, next: ArtifactKind) -> Result<()> {
    if control.stop_requested() {
        tracing::info!(%next, "stop observed before step");
        return Err(EngineError::Cancelled(format!(
            "stopped before the {} step",
            next
        )));
    }
    Ok(())
}
