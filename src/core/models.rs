use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Credential;

fn default_enabled() -> bool {
    true
}

/// A remote project to back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
        }
    }

    /// Project ids become directory names, so they must be a single path component.
    pub fn has_valid_id(&self) -> bool {
        is_valid_project_id(&self.id)
    }
}

pub fn is_valid_project_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

/// Immutable snapshot of everything one batch needs.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub base_url: String,
    pub credential: Credential,
    pub destination_root: PathBuf,
    pub retention_count: usize,
    pub request_timeout: Duration,
    pub projects: Vec<Project>,
}

impl BackupConfig {
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.destination_root.join(project_id)
    }

    pub fn download_url(&self, project_id: &str) -> String {
        format!(
            "{}/project/{}/download/zip",
            self.base_url.trim_end_matches('/'),
            project_id
        )
    }

    pub fn enabled_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.enabled)
    }
}

/// Why a single project's backup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DirectoryCreateError,
    RequestFailed,
    InvalidContent,
    Timeout,
    TransferError,
    EmptyArchive,
}

/// Result of one project's fetch.
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub project_id: String,
    pub project_name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    pub size_bytes: u64,
    pub pruned: usize,
}

/// Aggregate result of one pass over the enabled projects.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: usize,
    pub failure: usize,
    pub outcomes: Vec<BackupOutcome>,
}

impl BatchResult {
    pub fn new(run_id: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            success: 0,
            failure: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: BackupOutcome) {
        if outcome.ok {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure == 0
    }

    pub fn duration_secs(&self) -> u64 {
        (self.finished_at - self.started_at).num_seconds().max(0) as u64
    }
}

/// Human readable byte count, e.g. `1.50 MB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} TB", size)
}
