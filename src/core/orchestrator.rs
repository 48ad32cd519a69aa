use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

use crate::context::AppContext;
use crate::core::models::BatchResult;
use crate::core::notifications::{BatchEvent, create_notifier, should_notify};
use crate::core::runner::RunError;
use crate::scheduler::ScheduledTask;

/// Upper bound for one whole batch, on top of each download's own timeout.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(600);

/// What started a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
    Cli,
}

/// Entry point for every batch: resolves a config snapshot, runs the batch
/// under the batch timeout, reports the result.
pub struct Orchestrator {
    ctx: AppContext,
    batch_timeout: Duration,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            batch_timeout: BATCH_TIMEOUT,
        }
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Whether a batch is in progress, even one started before the
    /// destination root was changed.
    pub fn is_running(&self) -> bool {
        self.ctx.runner.locks().any_running()
    }

    pub async fn run_now(&self, trigger: Trigger) -> Result<BatchResult, RunError> {
        let app_config = self.ctx.store.snapshot().await;
        let config = app_config.backup_config();
        let span = info_span!("batch", trigger = ?trigger);

        let result = async {
            info!(projects = config.enabled_projects().count(), "Backup triggered");

            match tokio::time::timeout(self.batch_timeout, self.ctx.runner.run(&config)).await {
                Ok(result) => result,
                Err(_) => Err(RunError::TimedOut {
                    secs: self.batch_timeout.as_secs(),
                }),
            }
        }
        .instrument(span)
        .await;

        let event = match &result {
            Ok(batch) => {
                info!(
                    run_id = %batch.run_id,
                    success = batch.success,
                    failure = batch.failure,
                    duration_secs = batch.duration_secs(),
                    "Backup finished"
                );
                Some(BatchEvent::completed(batch))
            }
            // Another batch is already doing the work
            Err(e @ RunError::AlreadyRunning { .. }) => {
                warn!(error = %e, "Backup skipped");
                None
            }
            Err(e) => {
                error!(error = %e, "Backup aborted");
                Some(BatchEvent::Aborted {
                    error: e.to_string(),
                })
            }
        };

        let notifications = &app_config.notifications;
        if let Some(event) = event.filter(|e| should_notify(notifications, e)) {
            if let Some(notifier) = create_notifier(notifications) {
                if let Err(e) = notifier.notify(event).await {
                    warn!(error = %e, "Failed to send notification");
                }
            }
        }

        result
    }
}

#[async_trait]
impl ScheduledTask for Orchestrator {
    async fn run_once(&self) {
        // Outcome is already logged by run_now
        let _ = self.run_now(Trigger::Scheduled).await;
    }
}
