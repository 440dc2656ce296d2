use crate::alerts::RateLimiter;
use crate::error::ResponseError;
use crate::events::Severity;
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Maximum title length accepted by notification channels
const MAX_TITLE_LEN: usize = 256;
/// Maximum body length accepted by notification channels
const MAX_BODY_LEN: usize = 1024;

/// Boxed future returned by [`Notifier::send`]
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ResponseError>> + Send + 'a>>;

/// A message about an incident for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub incident_id: String,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    /// Emergency notifications bypass rate limiting
    pub emergency: bool,
}

impl Notification {
    pub fn new(
        incident_id: impl Into<String>,
        severity: Severity,
        title: &str,
        body: &str,
        emergency: bool,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            severity,
            title: truncate_text(title, MAX_TITLE_LEN),
            body: truncate_text(body, MAX_BODY_LEN),
            emergency,
        }
    }
}

/// A channel that delivers notifications
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a>;
}

/// Writes notifications to the application log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
        Box::pin(async move {
            if notification.emergency {
                error!(
                    "EMERGENCY [{}] {}: {}",
                    notification.incident_id, notification.title, notification.body
                );
            } else {
                warn!(
                    "NOTIFICATION [{}] {}: {}",
                    notification.incident_id, notification.title, notification.body
                );
            }
            Ok(())
        })
    }
}

/// Posts notifications as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, ResponseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ResponseError::HttpError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(notification)
                .send()
                .await
                .map_err(|e| ResponseError::HttpError(format!("Webhook request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(ResponseError::HttpError(format!(
                    "Webhook returned status {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

/// Fans notifications out to every configured channel
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    rate_limiter: Mutex<RateLimiter>,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, max_per_minute: usize) -> Self {
        Self {
            channels,
            rate_limiter: Mutex::new(RateLimiter::new(max_per_minute)),
        }
    }

    /// Log-only dispatcher
    pub fn with_log_channel(max_per_minute: usize) -> Self {
        Self::new(vec![Arc::new(LogNotifier)], max_per_minute)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Deliver a notification, returning the channels that accepted it
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` when a regular notification exceeds the limit,
    /// `NotificationFailed` when no channel delivered it.
    pub async fn dispatch(&self, notification: &Notification) -> Result<Vec<String>, ResponseError> {
        if !notification.emergency {
            let acquired = self
                .rate_limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_acquire();
            if !acquired {
                warn!(
                    "Notification for incident {} rate limited",
                    notification.incident_id
                );
                return Err(ResponseError::RateLimitExceeded);
            }
        }

        if self.channels.is_empty() {
            return Err(ResponseError::NotificationFailed(
                "no notification channels configured".to_string(),
            ));
        }

        let mut delivered = Vec::new();
        let mut failures = Vec::new();
        for channel in &self.channels {
            match channel.send(notification).await {
                Ok(()) => delivered.push(channel.name().to_string()),
                Err(e) => {
                    error!("Notification via {} failed: {}", channel.name(), e);
                    failures.push(format!("{}: {}", channel.name(), e));
                }
            }
        }

        if delivered.is_empty() {
            return Err(ResponseError::NotificationFailed(failures.join("; ")));
        }
        info!(
            "Notification for incident {} delivered via {}",
            notification.incident_id,
            delivered.join(", ")
        );
        Ok(delivered)
    }
}

/// Truncate to at most `max_length` bytes on a character boundary, marking the cut with `...`
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let mut cut = max_length.saturating_sub(3);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}
