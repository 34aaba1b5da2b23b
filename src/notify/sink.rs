//! Notification delivery targets.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::NotifyError;
use crate::letters::Role;

/// One push message addressed to everyone holding a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// `topic_<role>`, the subscription topic for the role.
    pub topic: String,
    #[serde(skip)]
    pub role: Role,
    pub title: String,
    pub body: String,
    /// `letter_id`, `status`, `type` and `event_id`.
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn topic_for(role: Role) -> String {
        format!("topic_{}", role.as_str())
    }
}

/// Delivers notifications somewhere.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            topic = %notification.topic,
            title = %notification.title,
            letter_id = notification.data.get("letter_id").map(String::as_str).unwrap_or(""),
            "Notification: {}",
            notification.body
        );
        Ok(())
    }
}

/// POSTs `{topic, title, body, data}` as JSON to a push gateway.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| NotifyError::SendFailed {
            topic: notification.topic.clone(),
            reason: e.to_string(),
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                topic: notification.topic.clone(),
                reason: format!("push gateway returned {status}: {body}"),
            });
        }
        Ok(())
    }
}

/// Sends to every inner sink; fails if any of them fails.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.send(notification).await {
                failures.push(format!("{}: {e}", sink.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::SendFailed {
                topic: notification.topic.clone(),
                reason: failures.join("; "),
            })
        }
    }
}

/// Records every notification in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Topics in delivery order.
    pub async fn topics(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|n| n.topic.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
