//! Application configuration.
//!
//! Loaded with figment from, in increasing priority: built-in defaults, the
//! TOML config file, and `OLBD_`-prefixed environment variables using `__` as
//! the section separator (`OLBD_BACKUP__CREDENTIAL=...`).

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{BackupConfig, Project};

pub const DEFAULT_CONFIG_PATH: &str = "olbd.toml";
pub const ENV_PREFIX: &str = "OLBD_";

/// Longest accepted scheduling interval: 31 days.
pub const MAX_BACKUP_INTERVAL_MINUTES: u64 = 31 * 24 * 60;

/// Longest accepted download timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Placeholder the dashboard sends back when the credential was not edited.
pub const REDACTED_PLACEHOLDER: &str = "***HIDDEN***";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Session cookie for the remote service.
///
/// Formatting never reveals the value; use [`Credential::expose`] at the one
/// place it is sent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad bind address: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub base_url: String,
    pub credential: Credential,
    pub backup_dir: PathBuf,
    /// Archives kept per project
    pub keep_last: usize,
    pub auto_backup: bool,
    /// Minutes between scheduled batches
    pub backup_interval: u64,
    /// Seconds allowed for one project download
    pub timeout: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.overleaf.com".to_string(),
            credential: Credential::default(),
            backup_dir: PathBuf::from("./Backup"),
            keep_last: 5,
            auto_backup: false,
            backup_interval: 15,
            timeout: 300,
        }
    }
}

impl BackupSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
    /// Only notify when a batch had failures or was aborted
    pub only_failures: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel: NotificationChannelType::None,
            slack_webhook: None,
            only_failures: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backup: BackupSettings,
    pub notifications: NotificationConfig,
    pub projects: Vec<Project>,
}

impl AppConfig {
    /// Load from `path`, writing a default file first if none exists.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            AppConfig::default().save(path)?;
            tracing::info!(path = %path.display(), "Created default configuration file");
        }

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        tracing::debug!(path = %path.display(), projects = config.projects.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Write beside the target then rename, so a crash never truncates the file
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(|source| ConfigError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backup.keep_last == 0 {
            return Err(ConfigError::Invalid("keep_last must be at least 1".into()));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.backup.timeout) {
            return Err(ConfigError::Invalid(format!(
                "timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }
        if !(1..=MAX_BACKUP_INTERVAL_MINUTES).contains(&self.backup.backup_interval) {
            return Err(ConfigError::Invalid(format!(
                "backup_interval must be between 1 and {} minutes",
                MAX_BACKUP_INTERVAL_MINUTES
            )));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if !project.has_valid_id() {
                return Err(ConfigError::Invalid(format!(
                    "invalid project id '{}'",
                    project.id
                )));
            }
            if !seen.insert(project.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate project id '{}'",
                    project.id
                )));
            }
        }
        Ok(())
    }

    /// Snapshot of what one batch needs.
    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            base_url: self.backup.base_url.clone(),
            credential: self.backup.credential.clone(),
            destination_root: self.backup.backup_dir.clone(),
            retention_count: self.backup.keep_last,
            request_timeout: Duration::from_secs(self.backup.timeout),
            projects: self.projects.clone(),
        }
    }

    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            server: self.server.clone(),
            backup: RedactedBackupSettings {
                base_url: self.backup.base_url.clone(),
                credential_set: !self.backup.credential.is_empty(),
                backup_dir: self.backup.backup_dir.clone(),
                keep_last: self.backup.keep_last,
                auto_backup: self.backup.auto_backup,
                backup_interval: self.backup.backup_interval,
                timeout: self.backup.timeout,
            },
            notifications: RedactedNotifications {
                channel: self.notifications.channel,
                slack_webhook_set: self
                    .notifications
                    .slack_webhook
                    .as_deref()
                    .is_some_and(|w| !w.is_empty()),
                only_failures: self.notifications.only_failures,
            },
            projects: self.projects.clone(),
        }
    }
}

/// Configuration as shown to API clients: secrets become presence flags.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfig {
    pub server: ServerConfig,
    pub backup: RedactedBackupSettings,
    pub notifications: RedactedNotifications,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactedBackupSettings {
    pub base_url: String,
    pub credential_set: bool,
    pub backup_dir: PathBuf,
    pub keep_last: usize,
    pub auto_backup: bool,
    pub backup_interval: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactedNotifications {
    pub channel: NotificationChannelType,
    pub slack_webhook_set: bool,
    pub only_failures: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ServerPatch {
    pub fn apply(self, server: &mut ServerConfig) {
        if let Some(host) = self.host {
            server.host = host;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupPatch {
    #[serde(alias = "overleaf_url")]
    pub base_url: Option<String>,
    #[serde(alias = "cookie")]
    pub credential: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub keep_last: Option<usize>,
    pub auto_backup: Option<bool>,
    pub backup_interval: Option<u64>,
    pub timeout: Option<u64>,
}

impl BackupPatch {
    pub fn apply(self, backup: &mut BackupSettings) {
        if let Some(base_url) = self.base_url {
            backup.base_url = base_url;
        }
        // Empty or placeholder means "unchanged"
        if let Some(credential) = self.credential {
            if !credential.trim().is_empty() && credential != REDACTED_PLACEHOLDER {
                backup.credential = Credential::new(credential.trim());
            }
        }
        if let Some(backup_dir) = self.backup_dir {
            backup.backup_dir = backup_dir;
        }
        if let Some(keep_last) = self.keep_last {
            backup.keep_last = keep_last;
        }
        if let Some(auto_backup) = self.auto_backup {
            backup.auto_backup = auto_backup;
        }
        if let Some(backup_interval) = self.backup_interval {
            backup.backup_interval = backup_interval;
        }
        if let Some(timeout) = self.timeout {
            backup.timeout = timeout;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

impl ProjectPatch {
    pub fn apply(self, project: &mut Project) {
        if let Some(id) = self.id {
            project.id = id;
        }
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(enabled) = self.enabled {
            project.enabled = enabled;
        }
    }
}
