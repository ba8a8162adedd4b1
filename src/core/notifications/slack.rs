use super::{BatchEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

/// Errors listed before the message is truncated
const MAX_LISTED_ERRORS: usize = 5;

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
            BatchEvent::Started { session_id, source } => json!({
                "blocks": [
                    header("Card Ingest Started"),
                    {
                        "type": "section",
                        "fields": [
                            field("Session", &format!("`{}`", short_id(session_id))),
                            field("Source", &format!("`{}`", source.display()))
                        ]
                    }
                ]
            }),
            BatchEvent::Completed {
                session_id,
                files_transferred,
                bytes_transferred,
                duration_ms,
                warnings,
            } => {
                let size_mb = *bytes_transferred as f64 / (1024.0 * 1024.0);
                let secs = *duration_ms as f64 / 1000.0;
                let speed_mbps = if secs > 0.0 { size_mb / secs } else { 0.0 };
                json!({
                    "blocks": [
                        header("Card Ingest Complete"),
                        {
                            "type": "section",
                            "fields": [
                                field("Session", &format!("`{}`", short_id(session_id))),
                                field("Files", &files_transferred.to_string()),
                                field("Size", &format!("{:.1} MB", size_mb)),
                                field("Duration", &format!("{:.1}s ({:.1} MB/s)", secs, speed_mbps)),
                                field("Warnings", &warnings.to_string())
                            ]
                        }
                    ]
                })
            }
            BatchEvent::Failed {
                session_id,
                files_transferred,
                files_total,
                errors,
            } => {
                let mut listed = errors
                    .iter()
                    .take(MAX_LISTED_ERRORS)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if errors.len() > MAX_LISTED_ERRORS {
                    listed.push_str(&format!("\n... and {} more", errors.len() - MAX_LISTED_ERRORS));
                }
                json!({
                    "blocks": [
                        header("Card Ingest Failed"),
                        {
                            "type": "section",
                            "fields": [
                                field("Session", &format!("`{}`", short_id(session_id))),
                                field("Files", &format!("{}/{}", files_transferred, files_total))
                            ]
                        },
                        {
                            "type": "section",
                            "text": {
                                "type": "mrkdwn",
                                "text": format!("*Errors:*\n```{}```", listed)
                            }
                        }
                    ]
                })
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn header(text: &str) -> serde_json::Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text, "emoji": true }
    })
}

fn field(label: &str, value: &str) -> serde_json::Value {
    json!({ "type": "mrkdwn", "text": format!("*{}:*\n{}", label, value) })
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
