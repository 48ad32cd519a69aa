mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::models::{BatchResult, ErrorKind};

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Completed {
        run_id: String,
        success: usize,
        failure: usize,
        duration_secs: u64,
        failed: Vec<FailedProject>,
    },
    Aborted {
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct FailedProject {
    pub name: String,
    pub reason: Option<ErrorKind>,
}

impl BatchEvent {
    pub fn completed(result: &BatchResult) -> Self {
        BatchEvent::Completed {
            run_id: result.run_id.clone(),
            success: result.success,
            failure: result.failure,
            duration_secs: result.duration_secs(),
            failed: result
                .outcomes
                .iter()
                .filter(|o| !o.ok)
                .map(|o| FailedProject {
                    name: o.project_name.clone(),
                    reason: o.reason,
                })
                .collect(),
        }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            BatchEvent::Completed { failure, .. } => *failure > 0,
            BatchEvent::Aborted { .. } => true,
        }
    }
}

/// Trait for notification channel implementations (Slack, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: BatchEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}

/// Whether `event` should be sent under `config`.
pub fn should_notify(config: &NotificationConfig, event: &BatchEvent) -> bool {
    !config.only_failures || event.is_failure()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::BackupOutcome;

    #[test]
    fn test_completed_event_lists_failures() {
        let mut result = BatchResult::new("run-1".into());
        result.record(BackupOutcome {
            project_id: "a".into(),
            project_name: "Thesis".into(),
            ok: false,
            reason: Some(ErrorKind::InvalidContent),
            message: None,
            archive: None,
            size_bytes: 0,
            pruned: 0,
        });

        let event = BatchEvent::completed(&result);
        match &event {
            BatchEvent::Completed { failure, failed, .. } => {
                assert_eq!(*failure, 1);
                assert_eq!(failed[0].name, "Thesis");
            }
            _ => panic!("expected Completed event"),
        }
        assert!(event.is_failure());
    }

    #[test]
    fn test_only_failures_filter() {
        let config = NotificationConfig::default();
        let ok = BatchEvent::completed(&BatchResult::new("run".into()));
        let aborted = BatchEvent::Aborted {
            error: "timed out".into(),
        };

        assert!(!should_notify(&config, &ok));
        assert!(should_notify(&config, &aborted));

        let always = NotificationConfig {
            only_failures: false,
            ..Default::default()
        };
        assert!(should_notify(&always, &ok));
    }

    #[test]
    fn test_no_notifier_without_webhook() {
        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some(String::new()),
            only_failures: true,
        };
        assert!(create_notifier(&config).is_none());
        assert!(create_notifier(&NotificationConfig::default()).is_none());
    }
}
