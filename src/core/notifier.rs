// Operator notifications
//
// Sent on hard-stop, fatal start failure and lost stream. Delivery failures
// are logged and never propagate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Logs each notification and keeps a bounded history
#[derive(Debug, Clone)]
pub struct LogNotifier {
    history: Arc<Mutex<VecDeque<Notification>>>,
    max_history: usize,
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LogNotifier {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Arc::new(Mutex::new(VecDeque::new())),
            max_history,
        }
    }

    pub fn history(&self) -> Vec<Notification> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn remember(&self, message: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(Notification {
                timestamp: Utc::now(),
                message: message.to_string(),
            });
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        error!("🚨 ALERT: {}", message);
        self.remember(message);
    }
}

/// POSTs `{"text": ..., "timestamp": ...}` to a webhook, and logs
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    log: LogNotifier,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
            log: LogNotifier::default(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        self.log.notify(message).await;

        let body = serde_json::json!({
            "text": message,
            "timestamp": Utc::now().to_rfc3339(),
        });

        // Delivery runs off the caller's task so teardown never waits on it
        let request = self.client.post(&self.url).json(&body);
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!("⚠️ Webhook returned HTTP {}", resp.status()),
                Err(e) => warn!("⚠️ Webhook delivery failed: {}", e),
            }
        });
    }
}

/// Pick the notifier from config
pub fn from_config(config: &crate::config::NotifyConfig) -> Arc<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier::default()),
    }
}
