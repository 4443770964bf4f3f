use anyhow::Result;
use serde_json::json;

/// Optional Slack webhook for batch summaries. Absent configuration
/// turns every send into a no-op.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
        }
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            tracing::debug!("SLACK_WEBHOOK_URL unset, notification dropped");
            return Ok(());
        };
        self.client
            .post(url)
            .json(&json!({"text": text}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
