//! bdr-notify
//!
//! Operator notifications. Progress and failure messages go to a chat
//! webhook when one is configured, otherwise to the log. Notification is
//! fire-and-forget: a failed delivery is logged and never fails the run.

pub mod report;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Attachment colour understood by the chat webhook.
    fn color(&self) -> Option<&'static str> {
        match self {
            Severity::Info => None,
            Severity::Warning => Some("warning"),
            Severity::Error => Some("danger"),
        }
    }
}

/// Notification sink. Errors alert the channel; delivery failures are
/// logged, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, severity: Severity, message: &str);
}

/// Posts Slack-style attachment payloads to a webhook URL.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        let text = if severity == Severity::Error {
            format!("<!channel> {message}")
        } else {
            message.to_string()
        };
        let mut attachment = json!({ "text": text });
        if let Some(color) = severity.color() {
            attachment["color"] = json!(color);
        }
        let payload = json!({ "attachments": [attachment] });

        let result = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            warn!("notification delivery failed: {e}");
        }
    }
}

/// Fallback sink when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}

/// Webhook sink when a URL is configured, log sink otherwise.
pub fn notifier_for(webhook_url: Option<&str>) -> Box<dyn Notifier> {
    match webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url)),
        None => Box::new(LogNotifier),
    }
}
