// pgsnap/src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::EngineError;

/// Hosting domain a cloud connection URL must reference.
pub const CLOUD_HOST_DOMAIN: &str = "supabase.com";

pub const DEFAULT_DUMP_DIR: &str = "./supabase/dumps";
pub const DEFAULT_CONFIG_FILE: &str = "./supabase/dumps/backup-config.json";

// Structs for (de)serializing backup-config.json
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub url: String,
    pub password: String,
}

impl CloudConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.url.trim().is_empty() {
            return Err(EngineError::ConfigInvalid("cloud.url is not set".into()));
        }
        if self.password.is_empty() {
            return Err(EngineError::ConfigInvalid("cloud.password is not set".into()));
        }
        if !self.url.contains(CLOUD_HOST_DOMAIN) {
            return Err(EngineError::ConfigInvalid(format!(
                "cloud.url must point at a {} host",
                CLOUD_HOST_DOMAIN
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("url", &self.url)
            .field("password", &if self.password.is_empty() { "" } else { "*****" })
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            database: "postgres".to_string(),
            password: String::new(),
        }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let missing: Vec<&str> = [
            ("local.host", self.host.trim().is_empty()),
            ("local.port", self.port == 0),
            ("local.user", self.user.trim().is_empty()),
            ("local.database", self.database.trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, bad)| bad.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigInvalid(format!(
                "missing or invalid: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupSettings {
    pub dump_dir: PathBuf,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
        }
    }
}

/// The persisted document: `cloud`, `local` and `backup` sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cloud: CloudConfig,
    pub local: LocalConfig,
    pub backup: BackupSettings,
}

/// External programs the engine drives. Not persisted.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub status_program: String,
    pub status_args: Vec<String>,
    pub roles_dump: String,
    pub dump: String,
    pub restore: String,
    pub revision: String,
    /// Schema holding the storage policies.
    pub storage_schema: String,
    /// How long a terminated step gets between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            status_program: "npx".to_string(),
            status_args: vec!["supabase".to_string(), "status".to_string()],
            roles_dump: "pg_dumpall".to_string(),
            dump: "pg_dump".to_string(),
            restore: "psql".to_string(),
            revision: "git".to_string(),
            storage_schema: "storage".to_string(),
            kill_grace: Duration::from_secs(3),
        }
    }
}

/// JSON-backed configuration file. Updates are merged in memory and the whole document is
/// rewritten on every save.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigStore {
    /// Loads the file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file at {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse JSON from config file at {}", path.display())
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            AppConfig::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn save(&self) -> Result<()> {
        write_config(&self.path, &self.config)
    }

    pub fn set_cloud(&mut self, url: String, password: String) -> Result<()> {
        let mut next = self.config.clone();
        next.cloud = CloudConfig { url, password };
        self.replace(next)
    }

    pub fn set_local(&mut self, local: LocalConfig) -> Result<()> {
        let mut next = self.config.clone();
        next.local = local;
        self.replace(next)
    }

    pub fn set_dump_dir(&mut self, dump_dir: PathBuf) -> Result<()> {
        let mut next = self.config.clone();
        next.backup.dump_dir = dump_dir;
        self.replace(next)
    }

    // In-memory state only changes once the new document is on disk.
    fn replace(&mut self, next: AppConfig) -> Result<()> {
        write_config(&self.path, &next)?;
        self.config = next;
        Ok(())
    }
}

fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory {}", parent.display())
        })?;
    }
    let body =
        serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    fs::write(path, body)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    tracing::info!(path = %path.display(), "configuration saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ConfigStore::load(&dir.path().join("backup-config.json"))?;

        assert_eq!(store.config(), &AppConfig::default());
        assert_eq!(store.config().local.port, 5432);
        assert_eq!(store.config().backup.dump_dir, PathBuf::from(DEFAULT_DUMP_DIR));
        Ok(())
    }

    #[test]
    fn partial_document_is_defaulted_per_field() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup-config.json");
        fs::write(
            &path,
            json!({
                "cloud": { "url": "postgresql://postgres@db.abc.supabase.com:5432/postgres" },
                "local": { "port": 54322 },
                "backup": { "dumpDir": "/var/dumps" }
            })
            .to_string(),
        )?;

        let store = ConfigStore::load(&path)?;
        let config = store.config();
        assert_eq!(config.cloud.password, "");
        assert_eq!(config.local.port, 54322);
        assert_eq!(config.local.host, "localhost");
        assert_eq!(config.backup.dump_dir, PathBuf::from("/var/dumps"));
        Ok(())
    }

    #[test]
    fn malformed_document_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup-config.json");
        fs::write(&path, "{ not json")?;
        assert!(ConfigStore::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn failed_save_leaves_the_store_unchanged() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file")?;
        let mut store = ConfigStore::load(&blocker.join("backup-config.json"))?;

        let result = store.set_cloud(
            "postgresql://postgres@db.abc.supabase.com:5432/postgres".into(),
            "secret".into(),
        );
        assert!(result.is_err());
        assert!(store.set_dump_dir(PathBuf::from("/tmp/dumps")).is_err());
        assert_eq!(store.config(), &AppConfig::default());
        Ok(())
    }

    #[test]
    fn save_rewrites_whole_document() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("backup-config.json");
        let mut store = ConfigStore::load(&path)?;

        store.set_cloud(
            "postgresql://postgres@db.abc.supabase.com:5432/postgres".into(),
            "secret".into(),
        )?;
        store.set_dump_dir(PathBuf::from("/tmp/dumps"))?;

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(written["cloud"]["password"], "secret");
        assert_eq!(written["local"]["host"], "localhost");
        assert_eq!(written["backup"]["dumpDir"], "/tmp/dumps");

        let reloaded = ConfigStore::load(&path)?;
        assert_eq!(reloaded.config(), store.config());
        Ok(())
    }

    #[test]
    fn cloud_validation_requires_hosting_domain() {
        let mut cloud = CloudConfig {
            url: "postgresql://postgres@db.example.org:5432/postgres".into(),
            password: "secret".into(),
        };
        assert!(matches!(cloud.validate(), Err(EngineError::ConfigInvalid(_))));

        cloud.url = "postgresql://postgres@db.abc.supabase.com:5432/postgres".into();
        assert!(cloud.validate().is_ok());

        cloud.password.clear();
        assert!(matches!(cloud.validate(), Err(EngineError::ConfigInvalid(_))));
    }

    #[test]
    fn local_validation_lists_missing_fields() {
        assert!(LocalConfig::default().validate().is_ok());

        let broken = LocalConfig {
            host: String::new(),
            port: 0,
            ..LocalConfig::default()
        };
        match broken.validate() {
            Err(EngineError::ConfigInvalid(msg)) => {
                assert!(msg.contains("local.host"));
                assert!(msg.contains("local.port"));
                assert!(!msg.contains("local.user"));
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn cloud_debug_hides_password() {
        let cloud = CloudConfig {
            url: "postgresql://postgres@db.abc.supabase.com/postgres".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", cloud).contains("hunter2"));
    }
}
