use super::{BatchEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &BatchEvent) -> serde_json::Value {
        match event {
            BatchEvent::Completed {
                run_id,
                success,
                failure,
                duration_secs,
                failed,
            } => {
                let short_id = &run_id[..8.min(run_id.len())];
                let title = if *failure > 0 {
                    "Backup Finished With Failures"
                } else {
                    "Backup Complete"
                };

                let mut blocks = vec![
                    json!({
                        "type": "header",
                        "text": {
                            "type": "plain_text",
                            "text": title,
                            "emoji": true
                        }
                    }),
                    json!({
                        "type": "section",
                        "fields": [
                            {
                                "type": "mrkdwn",
                                "text": format!("*Succeeded:*\n{}", success)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!("*Failed:*\n{}", failure)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!("*Run:*\n`{}`", short_id)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!("*Duration:*\n{}s", duration_secs)
                            }
                        ]
                    }),
                ];

                if !failed.is_empty() {
                    let lines: Vec<String> = failed
                        .iter()
                        .map(|p| match p.reason {
                            Some(reason) => format!("• {} ({:?})", p.name, reason),
                            None => format!("• {}", p.name),
                        })
                        .collect();
                    blocks.push(json!({
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!("*Failed projects:*\n{}", lines.join("\n"))
                        }
                    }));
                }

                json!({ "blocks": blocks })
            }
            BatchEvent::Aborted { error } => {
                json!({
                    "blocks": [
                        {
                            "type": "header",
                            "text": {
                                "type": "plain_text",
                                "text": "Backup Aborted",
                                "emoji": true
                            }
                        },
                        {
                            "type": "section",
                            "text": {
                                "type": "mrkdwn",
                                "text": format!("*Error:*\n```{}```", error)
                            }
                        }
                    ]
                })
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: BatchEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ErrorKind;
    use crate::core::notifications::FailedProject;

    #[test]
    fn test_failed_batch_lists_projects() {
        let notifier = SlackNotifier::new("http://localhost/hook".into());
        let message = notifier.format_message(&BatchEvent::Completed {
            run_id: "0190a1b2-c3d4".into(),
            success: 1,
            failure: 1,
            duration_secs: 12,
            failed: vec![FailedProject {
                name: "Thesis".into(),
                reason: Some(ErrorKind::Timeout),
            }],
        });

        let text = message.to_string();
        assert!(text.contains("Backup Finished With Failures"));
        assert!(text.contains("Thesis (Timeout)"));
        assert!(text.contains("`0190a1b2`"));
    }

    #[test]
    fn test_aborted_message() {
        let notifier = SlackNotifier::new("http://localhost/hook".into());
        let message = notifier.format_message(&BatchEvent::Aborted {
            error: "no session credential configured".into(),
        });
        assert!(message.to_string().contains("Backup Aborted"));
    }
}
