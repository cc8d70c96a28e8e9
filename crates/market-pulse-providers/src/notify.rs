use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::NotifyError;

const PUSHOVER_MESSAGES_URL: &str = "https://api.pushover.net/1/messages.json";

/// An operator alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Notification {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i8>,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Outbound alert channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `Ok(false)` when the service accepted the request but did not queue the message.
    async fn send_notification(&self, notification: &Notification) -> Result<bool, NotifyError>;
}

/// Pushover push notifications.
pub struct PushoverNotifier {
    client: Client,
    token: String,
    user: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PushoverReceipt {
    status: i32,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Serialize)]
struct PushoverMessage<'a> {
    token: &'a str,
    user: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl PushoverNotifier {
    /// Create from environment variables `PUSHOVER_TOKEN` and `PUSHOVER_USER`.
    pub fn from_env() -> Result<Self, NotifyError> {
        let token = std::env::var("PUSHOVER_TOKEN")
            .map_err(|_| NotifyError::Config("PUSHOVER_TOKEN not set".into()))?;
        let user = std::env::var("PUSHOVER_USER")
            .map_err(|_| NotifyError::Config("PUSHOVER_USER not set".into()))?;
        Ok(Self::new(token, user, None))
    }

    pub fn new(token: String, user: String, url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            token,
            user,
            url: url.unwrap_or_else(|| PUSHOVER_MESSAGES_URL.to_string()),
        }
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<bool, NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PushoverMessage {
                token: &self.token,
                user: &self.user,
                notification,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status,
                message: body,
            });
        }

        let receipt: PushoverReceipt = response.json().await?;
        if receipt.status != 1 {
            warn!(errors = ?receipt.errors, "pushover did not queue notification");
            return Ok(false);
        }
        info!(title = ?notification.title, "notification sent");
        Ok(true)
    }
}

/// Used when no push credentials are configured; alerts only reach the log.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<bool, NotifyError> {
        warn!(
            title = notification.title.as_deref().unwrap_or(""),
            "{}", notification.message
        );
        Ok(true)
    }
}
