pub mod archive;
pub mod fetcher;
pub mod lock;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod retention;
pub mod runner;

pub use archive::{ArchiveEntry, ArchiveName, list_archives};
pub use fetcher::{ArchiveFetcher, FetchError};
pub use lock::{RunGuard, RunLocks};
pub use models::{
    BackupConfig, BackupOutcome, BatchResult, ErrorKind, Project, format_size, is_valid_project_id,
};
pub use orchestrator::{Orchestrator, Trigger};
pub use retention::{PruneSummary, prune};
pub use runner::{BackupRunner, RunError};
