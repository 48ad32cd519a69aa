use std::sync::Arc;

use crate::core::{ArchiveFetcher, BackupRunner, RunLocks};
use crate::store::ConfigStore;

/// Shared handles for everything that triggers or inspects batches.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<ConfigStore>,
    pub runner: BackupRunner,
}

impl AppContext {
    pub fn new(store: ConfigStore) -> Self {
        let runner = BackupRunner::new(
            ArchiveFetcher::new(reqwest::Client::new()),
            RunLocks::new(),
        );
        Self {
            store: Arc::new(store),
            runner,
        }
    }
}
