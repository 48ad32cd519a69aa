use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use super::fetcher::ArchiveFetcher;
use super::lock::RunLocks;
use super::models::{BackupConfig, BatchResult, Project};

/// Conditions that stop a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no session credential configured")]
    MissingCredential,

    #[error("no service base URL configured")]
    MissingBaseUrl,

    #[error("a backup is already running for {}", .root.display())]
    AlreadyRunning { root: PathBuf },

    #[error("backup batch exceeded {secs}s and was aborted")]
    TimedOut { secs: u64 },
}

/// Runs one batch: every enabled project, one at a time.
#[derive(Clone)]
pub struct BackupRunner {
    fetcher: ArchiveFetcher,
    locks: RunLocks,
}

impl BackupRunner {
    pub fn new(fetcher: ArchiveFetcher, locks: RunLocks) -> Self {
        Self { fetcher, locks }
    }

    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Back up every enabled project in list order.
    ///
    /// A project's failure is recorded and the batch moves on; only a missing
    /// credential or base URL, or another run holding the destination root,
    /// stop the batch before it starts.
    pub async fn run(&self, config: &BackupConfig) -> Result<BatchResult, RunError> {
        let enabled: Vec<&Project> = config.enabled_projects().collect();
        let mut result = BatchResult::new(Uuid::now_v7().to_string());

        if enabled.is_empty() {
            info!("No enabled projects to back up");
            return Ok(result.finish());
        }

        if config.base_url.trim().is_empty() {
            return Err(RunError::MissingBaseUrl);
        }
        if config.credential.is_empty() {
            return Err(RunError::MissingCredential);
        }

        let _guard = self
            .locks
            .try_acquire(&config.destination_root)
            .ok_or_else(|| RunError::AlreadyRunning {
                root: config.destination_root.clone(),
            })?;

        info!(
            run_id = %result.run_id,
            projects = enabled.len(),
            destination = %config.destination_root.display(),
            "Starting backup batch"
        );

        let total = enabled.len();
        for (i, project) in enabled.into_iter().enumerate() {
            info!(progress = %format!("{}/{}", i + 1, total), project = %project.id, "Backing up project");
            let outcome = self.fetcher.fetch(project, config).await;
            result.record(outcome);
        }

        let result = result.finish();
        if result.failure > 0 {
            warn!(
                run_id = %result.run_id,
                success = result.success,
                failure = result.failure,
                "Backup batch finished with failures"
            );
        } else {
            info!(
                run_id = %result.run_id,
                success = result.success,
                "Backup batch finished"
            );
        }

        Ok(result)
    }
}
