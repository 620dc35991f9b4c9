// pgsnap/src/restore/db_restore.rs
use std::path::Path;

use crate::backup::db_dump::PASSWORD_ENV;
use crate::config::ToolsConfig;
use crate::model::ArtifactKind;
use crate::runner::StepCommand;
use crate::target::ResolvedTarget;

/// Builds the restore invocation feeding `file` into the target database.
///
/// The script runs with psqlrc disabled and stops at the first error. With `skip_conflicts`
/// the data step keeps going past errors instead, so rows that already exist do not abort a
/// re-restore.
pub fn restore_command(
    kind: ArtifactKind,
    target: &ResolvedTarget,
    tools: &ToolsConfig,
    file: &Path,
    skip_conflicts: bool,
) -> StepCommand {
    let conn = &target.descriptor;
    let mut cmd = StepCommand::new(tools.restore.as_str()).args(["-X", "-v", "ON_ERROR_STOP=1"]);

    cmd = match &target.url {
        Some(url) => cmd.arg(url.as_str()),
        None => cmd
            .arg("-h")
            .arg(conn.host.as_str())
            .arg("-p")
            .arg(conn.port.to_string())
            .arg("-U")
            .arg(conn.user.as_str())
            .arg("-d")
            .arg(conn.database.as_str()),
    };

    cmd = cmd.arg("-f").arg(file.to_string_lossy());
    if skip_conflicts && kind == ArtifactKind::Data {
        cmd = cmd.args(["-v", "ON_ERROR_STOP=0"]);
    }
    cmd.env(PASSWORD_ENV, conn.password.as_str())
}
