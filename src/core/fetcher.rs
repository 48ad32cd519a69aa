use chrono::Local;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue, USER_AGENT};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::archive;
use super::models::{
    BackupConfig, BackupOutcome, ErrorKind, Project, format_size, is_valid_project_id,
};
use super::retention;
use crate::logging::LogThrottle;

/// Sent with every download; the remote service rejects obvious bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const ARCHIVE_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/octet-stream",
    "application/x-zip-compressed",
];

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Why one project's download failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to create project directory {}: {source}", .path.display())]
    DirectoryCreate { path: PathBuf, source: io::Error },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("unexpected content type '{content_type}', the session credential may have expired")]
    InvalidContent { content_type: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("transfer aborted: {0}")]
    Transfer(String),

    #[error("downloaded archive is empty")]
    EmptyArchive,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::DirectoryCreate { .. } => ErrorKind::DirectoryCreateError,
            FetchError::RequestFailed(_) => ErrorKind::RequestFailed,
            FetchError::InvalidContent { .. } => ErrorKind::InvalidContent,
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Transfer(_) => ErrorKind::TransferError,
            FetchError::EmptyArchive => ErrorKind::EmptyArchive,
        }
    }
}

/// A verified archive in its final location.
#[derive(Debug)]
struct SavedArchive {
    path: PathBuf,
    size: u64,
}

type PruneFn = fn(&Path, usize) -> io::Result<retention::PruneSummary>;

/// Downloads one project's archive and applies retention on success.
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    prune: PruneFn,
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ArchiveFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            prune: retention::prune,
        }
    }

    #[cfg(test)]
    fn with_prune(mut self, prune: PruneFn) -> Self {
        self.prune = prune;
        self
    }

    /// Back up a single project. Never fails: the outcome carries the reason.
    pub async fn fetch(&self, project: &Project, config: &BackupConfig) -> BackupOutcome {
        let span = info_span!("fetch", project = %project.id);

        async {
            info!(name = %project.name, "Starting project backup");
            let start = Instant::now();

            match self.download(project, config).await {
                Ok(saved) => {
                    let archive_name = saved
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string());

                    info!(
                        archive = archive_name.as_deref().unwrap_or_default(),
                        size = %format_size(saved.size),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Backup complete"
                    );

                    let pruned = apply_retention(
                        self.prune,
                        config.project_dir(&project.id),
                        config.retention_count,
                    )
                    .await;

                    BackupOutcome {
                        project_id: project.id.clone(),
                        project_name: project.name.clone(),
                        ok: true,
                        reason: None,
                        message: None,
                        archive: archive_name,
                        size_bytes: saved.size,
                        pruned,
                    }
                }
                Err(e) => {
                    error!(kind = ?e.kind(), error = %e, "Backup failed");

                    BackupOutcome {
                        project_id: project.id.clone(),
                        project_name: project.name.clone(),
                        ok: false,
                        reason: Some(e.kind()),
                        message: Some(e.to_string()),
                        archive: None,
                        size_bytes: 0,
                        pruned: 0,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn download(
        &self,
        project: &Project,
        config: &BackupConfig,
    ) -> Result<SavedArchive, FetchError> {
        let dir = config.project_dir(&project.id);
        ensure_project_dir(&project.id, &dir).await?;

        let archive_path = archive::next_archive_path(&dir, Local::now());
        let url = config.download_url(&project.id);
        let timeout_secs = config.request_timeout.as_secs();

        let mut cookie = HeaderValue::from_str(config.credential.expose()).map_err(|_| {
            FetchError::RequestFailed("session credential is not a valid header value".into())
        })?;
        cookie.set_sensitive(true);

        debug!(url = %url, "Requesting archive");
        let mut response = self
            .client
            .get(&url)
            .header(COOKIE, cookie)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout { secs: timeout_secs }
                } else {
                    FetchError::RequestFailed(describe(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RequestFailed(format!(
                "server responded with {}",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_archive_content_type(&content_type) {
            return Err(FetchError::InvalidContent { content_type });
        }

        let partial = PartialFile::new(archive::partial_path(&archive_path));
        let mut file = File::create(&partial.path)
            .await
            .map_err(|e| FetchError::Transfer(format!("failed to create archive file: {}", e)))?;

        let mut throttle = LogThrottle::new(PROGRESS_LOG_INTERVAL);
        let mut received: u64 = 0;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    return Err(FetchError::Timeout { secs: timeout_secs });
                }
                Err(e) => return Err(FetchError::Transfer(describe(&e))),
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Transfer(format!("failed to write archive: {}", e)))?;
            received += chunk.len() as u64;

            if throttle.should_log() {
                debug!(bytes = received, "Download progress");
            }
        }

        file.flush()
            .await
            .map_err(|e| FetchError::Transfer(format!("failed to flush archive: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| FetchError::Transfer(format!("failed to sync archive: {}", e)))?;
        drop(file);

        let size = fs::metadata(&partial.path)
            .await
            .map(|m| m.len())
            .map_err(|e| FetchError::Transfer(format!("archive missing after download: {}", e)))?;
        if size == 0 {
            return Err(FetchError::EmptyArchive);
        }

        partial
            .persist(&archive_path)
            .await
            .map_err(|e| FetchError::Transfer(format!("failed to finalize archive: {}", e)))?;

        Ok(SavedArchive {
            path: archive_path,
            size,
        })
    }
}

fn is_archive_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    ARCHIVE_CONTENT_TYPES
        .iter()
        .any(|accepted| content_type.contains(accepted))
}

async fn ensure_project_dir(project_id: &str, dir: &Path) -> Result<(), FetchError> {
    if !is_valid_project_id(project_id) {
        return Err(FetchError::DirectoryCreate {
            path: dir.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "project id is not a valid directory name",
            ),
        });
    }

    fs::create_dir_all(dir)
        .await
        .map_err(|source| FetchError::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })
}

/// Run retention for a project directory. Returns the number of deleted archives.
async fn apply_retention(prune: PruneFn, dir: PathBuf, keep: usize) -> usize {
    let result = tokio::task::spawn_blocking(move || prune(&dir, keep)).await;

    match result {
        Ok(Ok(summary)) => {
            if summary.failed > 0 {
                warn!(
                    deleted = summary.deleted,
                    failed = summary.failed,
                    "Some old archives could not be deleted"
                );
            } else if summary.deleted > 0 {
                info!(deleted = summary.deleted, keep, "Pruned old archives");
            }
            summary.deleted
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Retention pass failed");
            0
        }
        Err(e) => {
            warn!(error = %e, "Retention task panicked");
            0
        }
    }
}

/// reqwest's Display hides the underlying cause; walk the chain.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

/// A download in progress. Removed on drop unless persisted, so neither an
/// error nor a cancelled batch leaves a partial archive behind.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    async fn persist(mut self, to: &Path) -> io::Result<()> {
        fs::rename(&self.path, to).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial archive"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial archive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credential;
    use tempfile::tempdir;

    #[test]
    fn test_archive_content_types() {
        assert!(is_archive_content_type("application/zip"));
        assert!(is_archive_content_type("Application/Octet-Stream"));
        assert!(is_archive_content_type("application/x-zip-compressed; charset=binary"));
        assert!(!is_archive_content_type("text/html; charset=utf-8"));
        assert!(!is_archive_content_type(""));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(FetchError::EmptyArchive.kind(), ErrorKind::EmptyArchive);
        assert_eq!(
            FetchError::Timeout { secs: 5 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            FetchError::InvalidContent {
                content_type: "text/html".into()
            }
            .kind(),
            ErrorKind::InvalidContent
        );
    }

    #[tokio::test]
    async fn test_invalid_project_id_is_directory_error() {
        let temp = tempdir().unwrap();
        let err = ensure_project_dir("..", &temp.path().join(".."))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryCreateError);
    }

    fn stuck_prune(_: &Path, _: usize) -> io::Result<retention::PruneSummary> {
        Ok(retention::PruneSummary {
            deleted: 1,
            failed: 1,
        })
    }

    fn unlistable_prune(_: &Path, _: usize) -> io::Result<retention::PruneSummary> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
    }

    #[tokio::test]
    async fn test_retention_failure_keeps_fetch_successful() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/project/abc123/download/zip")
            .with_status(200)
            .with_header("content-type", "application/zip")
            .with_body("PK\x05\x06")
            .expect(2)
            .create_async()
            .await;

        let temp = tempdir().unwrap();
        let project = Project::new("abc123", "Thesis");
        let config = BackupConfig {
            base_url: server.url(),
            credential: Credential::new("session=abc"),
            destination_root: temp.path().to_path_buf(),
            retention_count: 1,
            request_timeout: Duration::from_secs(10),
            projects: vec![project.clone()],
        };

        for (prune, pruned) in [(stuck_prune as PruneFn, 1), (unlistable_prune as PruneFn, 0)] {
            let outcome = ArchiveFetcher::default()
                .with_prune(prune)
                .fetch(&project, &config)
                .await;
            assert!(outcome.ok, "unexpected failure: {:?}", outcome.message);
            assert_eq!(outcome.reason, None);
            assert_eq!(outcome.pruned, pruned);
        }

        assert_eq!(archive::list_archives(&temp.path().join("abc123")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_file_removed_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("backup_20240309_101500.zip.part");
        std::fs::write(&path, b"half").unwrap();

        drop(PartialFile::new(path.clone()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_partial_file_persist_renames() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("backup_20240309_101500.zip.part");
        let target = temp.path().join("backup_20240309_101500.zip");
        std::fs::write(&path, b"PK").unwrap();

        PartialFile::new(path.clone()).persist(&target).await.unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"PK");
    }
}
