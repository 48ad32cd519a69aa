//! HTTP handlers for the JSON API.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::UNIX_EPOCH;

use super::WebState;
use crate::config::{BackupPatch, ConfigError, ProjectPatch, RedactedConfig, ServerPatch};
use crate::core::models::is_valid_project_id;
use crate::core::{BatchResult, Project, RunError, Trigger, archive, format_size, list_archives};
use crate::store::StoreError;

/// JSON error body: `{"success": false, "error": "..."}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "API request failed");
        }
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::DuplicateProject(_) | StoreError::Config(ConfigError::Invalid(_)) => {
                StatusCode::BAD_REQUEST
            }
            StoreError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct Ack {
    success: bool,
    message: String,
}

fn ack(message: impl Into<String>) -> Json<Ack> {
    Json(Ack {
        success: true,
        message: message.into(),
    })
}

pub async fn get_config(State(state): State<WebState>) -> Json<RedactedConfig> {
    Json(state.store.redacted().await)
}

pub async fn update_server(
    State(state): State<WebState>,
    Json(patch): Json<ServerPatch>,
) -> ApiResult<Ack> {
    state.store.update_server(patch).await?;
    Ok(ack("Server settings saved; restart to apply"))
}

pub async fn update_backup(
    State(state): State<WebState>,
    Json(patch): Json<BackupPatch>,
) -> ApiResult<Ack> {
    let settings = state.store.update_backup(patch).await?;
    state.scheduler.apply(&settings);
    Ok(ack("Backup settings saved"))
}

pub async fn list_projects(State(state): State<WebState>) -> Json<Vec<Project>> {
    Json(state.store.list_projects().await)
}

#[derive(Deserialize)]
pub struct NewProject {
    id: String,
    name: String,
    enabled: Option<bool>,
}

pub async fn add_project(
    State(state): State<WebState>,
    Json(new): Json<NewProject>,
) -> ApiResult<Ack> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "project name is required"));
    }

    let mut project = Project::new(new.id.trim(), name);
    project.enabled = new.enabled.unwrap_or(true);

    state.store.add_project(project).await?;
    Ok(ack("Project added"))
}

pub async fn update_project(
    State(state): State<WebState>,
    Path(index): Path<usize>,
    Json(patch): Json<ProjectPatch>,
) -> ApiResult<Ack> {
    state.store.update_project(index, patch).await?;
    Ok(ack("Project updated"))
}

pub async fn toggle_project(
    State(state): State<WebState>,
    Path(index): Path<usize>,
) -> ApiResult<Project> {
    Ok(Json(state.store.toggle_project(index).await?))
}

pub async fn delete_project(
    State(state): State<WebState>,
    Path(index): Path<usize>,
) -> ApiResult<Ack> {
    let project = state.store.delete_project(index).await?;
    Ok(ack(format!("Project \"{}\" deleted", project.name)))
}

#[derive(Serialize)]
pub struct RunResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<BatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: DateTime<Utc>,
}

pub async fn run_backup(State(state): State<WebState>) -> (StatusCode, Json<RunResponse>) {
    match state.orchestrator.run_now(Trigger::Manual).await {
        Ok(result) => (
            StatusCode::OK,
            Json(RunResponse {
                success: result.is_success(),
                result: Some(result),
                error: None,
                timestamp: Utc::now(),
            }),
        ),
        Err(e) => {
            let status = match e {
                RunError::AlreadyRunning { .. } => StatusCode::CONFLICT,
                RunError::MissingCredential | RunError::MissingBaseUrl => StatusCode::BAD_REQUEST,
                RunError::TimedOut { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(RunResponse {
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                }),
            )
        }
    }
}

#[derive(Serialize)]
pub struct ArchiveInfo {
    filename: String,
    size: u64,
    size_human: String,
    /// Seconds since the Unix epoch
    created: f64,
    created_date: String,
}

pub async fn list_backups(
    State(state): State<WebState>,
    Path(project_id): Path<String>,
) -> ApiResult<Vec<ArchiveInfo>> {
    if !is_valid_project_id(&project_id) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "invalid project id"));
    }

    let dir = state.store.snapshot().await.backup.backup_dir.join(&project_id);
    let archives = tokio::task::spawn_blocking(move || list_archives(&dir))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(format!("failed to list archives: {}", e)))?;

    let infos = archives
        .into_iter()
        .map(|a| ArchiveInfo {
            filename: a.file_name(),
            size: a.size,
            size_human: format_size(a.size),
            created: a
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
            created_date: DateTime::<Local>::from(a.modified)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        })
        .collect();

    Ok(Json(infos))
}

#[derive(Serialize)]
pub struct Status {
    total_projects: usize,
    enabled_projects: usize,
    total_backup_files: usize,
    total_backup_size: u64,
    total_backup_size_human: String,
    auto_backup_enabled: bool,
    backup_interval: u64,
    scheduler_active: bool,
    credential_set: bool,
    running: bool,
}

pub async fn status(State(state): State<WebState>) -> ApiResult<Status> {
    let config = state.store.snapshot().await;
    let root = config.backup.backup_dir.clone();

    let usage = tokio::task::spawn_blocking(move || archive::usage(&root))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(format!("failed to scan backups: {}", e)))?;

    Ok(Json(Status {
        total_projects: config.projects.len(),
        enabled_projects: config.projects.iter().filter(|p| p.enabled).count(),
        total_backup_files: usage.files,
        total_backup_size: usage.bytes,
        total_backup_size_human: format_size(usage.bytes),
        auto_backup_enabled: config.backup.auto_backup,
        backup_interval: config.backup.backup_interval,
        scheduler_active: state.scheduler.is_active(),
        credential_set: !config.backup.credential.is_empty(),
        running: state.orchestrator.is_running(),
    }))
}
