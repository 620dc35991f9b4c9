use std::process::Stdio;
use tokio::process::Command;

/// Marker used in backup names when no revision is available.
pub const NO_REVISION: &str = "nogit";

/// Where a backup's revision identifier comes from.
#[derive(Debug, Clone)]
pub enum RevisionSource {
    /// Ask the version-control tool for the short hash of `HEAD`.
    Git { program: String },
    /// Always use this value.
    Fixed(Option<String>),
}

impl RevisionSource {
    /// Best-effort lookup; any failure yields `None`.
    pub async fn lookup(&self) -> Option<String> {
        match self {
            RevisionSource::Git { program } => short_head_hash(program).await,
            RevisionSource::Fixed(value) => value.clone(),
        }
    }
}

async fn short_head_hash(program: &str) -> Option<String> {
    let output = Command::new(program)
        .args(["rev-parse", "--short", "HEAD"])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let hash = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!hash.is_empty()).then_some(hash)
        }
        Ok(out) => {
            tracing::debug!(status = %out.status, "revision lookup failed");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, program, "revision tool unavailable");
            None
        }
    }
}
