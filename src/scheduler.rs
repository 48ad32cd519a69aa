//! Recurring batch trigger.
//!
//! The scheduler owns at most one pending job. Reconfiguring replaces it;
//! cancelling removes it. A batch that is already running when the job is
//! cancelled runs to completion.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackupSettings;

/// Work fired on every tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    async fn run_once(&self);
}

struct ScheduledJob {
    interval: Duration,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

pub struct Scheduler {
    task: Arc<dyn ScheduledTask>,
    job: Mutex<Option<ScheduledJob>>,
}

impl Scheduler {
    pub fn new(task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            task,
            job: Mutex::new(None),
        }
    }

    /// Replace any pending job with one firing every `interval`, first tick
    /// one interval from now. Must be called inside a tokio runtime.
    ///
    /// An interval too large to schedule leaves no job pending.
    pub fn reconfigure(&self, interval: Duration) {
        let mut job = self.lock_job();
        if let Some(previous) = job.take() {
            previous.cancel.cancel();
        }

        let Some(first_tick) = Instant::now().checked_add(interval) else {
            warn!(
                interval_secs = interval.as_secs(),
                "Backup interval out of range, not scheduling"
            );
            return;
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            self.task.clone(),
            first_tick,
            interval,
            cancel.clone(),
        ));
        *job = Some(ScheduledJob {
            interval,
            cancel,
            _handle: handle,
        });

        info!(interval_secs = interval.as_secs(), "Scheduled backups enabled");
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.lock_job().take() {
            previous.cancel.cancel();
            info!("Scheduled backups disabled");
        }
    }

    /// Follow the auto-backup settings: schedule when enabled, cancel otherwise.
    pub fn apply(&self, settings: &BackupSettings) {
        if settings.auto_backup {
            self.reconfigure(settings.interval());
        } else {
            self.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_job().is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.lock_job().as_ref().map(|job| job.interval)
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<ScheduledJob>> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(job) = self.lock_job().take() {
            job.cancel.cancel();
        }
    }
}

async fn tick_loop(
    task: Arc<dyn ScheduledTask>,
    first_tick: Instant,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation wins over a tick that became due during a long batch
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                debug!("Scheduled tick");
                task.run_once().await;
            }
        }
    }

    debug!("Scheduler loop stopped");
}
