//! Turns a [`Target`] plus the stored configuration into live connection parameters.

use crate::config::AppConfig;
use crate::discovery::InstanceDiscovery;
use crate::errors::{EngineError, Result};
use crate::model::{ConnectionDescriptor, Target};
use crate::utils::credentials::{descriptor_from_url, resolve_cloud_url, strip_password};

#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub target: Target,
    pub descriptor: ConnectionDescriptor,
    /// Cloud only: the connection URL with the password removed.
    pub url: Option<String>,
}

/// Validates the target's configuration and, for the local target, runs discovery.
///
/// Local targets use the discovered parameters; the stored local section only has to be
/// well-formed. A local instance that is not running is `TargetUnavailable`.
pub async fn resolve_target(
    config: &AppConfig,
    discovery: &dyn InstanceDiscovery,
    target: Target,
) -> Result<ResolvedTarget> {
    match target {
        Target::Cloud => {
            let cloud = &config.cloud;
            cloud.validate()?;
            let url = resolve_cloud_url(&cloud.url, &cloud.password)?;
            let descriptor = descriptor_from_url(&url, &cloud.password)?;
            let url = strip_password(&url)?;
            tracing::debug!(url = %url, "cloud target resolved");
            Ok(ResolvedTarget {
                target,
                descriptor,
                url: Some(url),
            })
        }
        Target::Local => {
            config.local.validate()?;
            let descriptor = discovery.discover().await;
            if !descriptor.is_running {
                return Err(EngineError::TargetUnavailable(
                    "local database instance is not running".into(),
                ));
            }
            Ok(ResolvedTarget {
                target,
                descriptor,
                url: None,
            })
        }
    }
}
