//! Persistent configuration store.
//!
//! Holds the current [`AppConfig`] behind a lock and writes every change back
//! to the TOML file. Batches never read the store directly; they receive a
//! [`BackupConfig`](crate::core::BackupConfig) snapshot so concurrent edits
//! cannot affect a running batch.

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{
    AppConfig, BackupPatch, BackupSettings, ConfigError, ProjectPatch, RedactedConfig,
    ServerConfig, ServerPatch,
};
use crate::core::Project;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("project id '{0}' already exists")]
    DuplicateProject(String),

    #[error("no project at index {0}")]
    ProjectNotFound(usize),
}

pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Load the configuration at `path`, creating a default file if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let config = AppConfig::load(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }

    pub async fn redacted(&self) -> RedactedConfig {
        self.inner.read().await.redacted()
    }

    pub async fn update_server(&self, patch: ServerPatch) -> Result<ServerConfig, StoreError> {
        self.mutate(|config| {
            patch.apply(&mut config.server);
            Ok(config.server.clone())
        })
        .await
    }

    pub async fn update_backup(&self, patch: BackupPatch) -> Result<BackupSettings, StoreError> {
        self.mutate(|config| {
            patch.apply(&mut config.backup);
            Ok(config.backup.clone())
        })
        .await
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        self.inner.read().await.projects.clone()
    }

    pub async fn add_project(&self, project: Project) -> Result<Project, StoreError> {
        self.mutate(|config| {
            if config.projects.iter().any(|p| p.id == project.id) {
                return Err(StoreError::DuplicateProject(project.id.clone()));
            }
            config.projects.push(project.clone());
            Ok(project)
        })
        .await
    }

    pub async fn update_project(
        &self,
        index: usize,
        patch: ProjectPatch,
    ) -> Result<Project, StoreError> {
        self.mutate(|config| {
            let project = config
                .projects
                .get_mut(index)
                .ok_or(StoreError::ProjectNotFound(index))?;
            patch.apply(project);
            Ok(project.clone())
        })
        .await
    }

    pub async fn toggle_project(&self, index: usize) -> Result<Project, StoreError> {
        self.mutate(|config| {
            let project = config
                .projects
                .get_mut(index)
                .ok_or(StoreError::ProjectNotFound(index))?;
            project.enabled = !project.enabled;
            Ok(project.clone())
        })
        .await
    }

    pub async fn delete_project(&self, index: usize) -> Result<Project, StoreError> {
        self.mutate(|config| {
            if index >= config.projects.len() {
                return Err(StoreError::ProjectNotFound(index));
            }
            Ok(config.projects.remove(index))
        })
        .await
    }

    /// Apply `f` to a copy, validate, persist, then publish.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut AppConfig) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut current = self.inner.write().await;
        let mut next = current.clone();

        let out = f(&mut next)?;
        next.validate()?;
        next.save(&self.path)?;

        *current = next;
        info!(path = %self.path.display(), "Configuration saved");
        Ok(out)
    }
}
