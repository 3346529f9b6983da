//! Webhook delivery via HTTP POST.

use super::{NotificationEvent, Notifier};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts change events to a webhook endpoint (Discord-compatible
/// payload shape).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    username: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, username: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            username: username.to_string(),
        })
    }
}

/// JSON body posted to the webhook.
fn payload(event: &NotificationEvent, username: &str) -> serde_json::Value {
    let content = match &event.text {
        Some(text) => format!("URL: {}\nText: {}", event.target_url, text),
        None => format!("URL: {}", event.target_url),
    };
    serde_json::json!({
        "content": content,
        "username": username,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let body = payload(event, &self.username);
        tracing::info!("sending payload to webhook: {body}");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("webhook request failed")?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            status => bail!("webhook returned unexpected status: {status}"),
        }
    }
}
