//! Host notification surface.
//!
//! ```text
//!   Notification
//!     -> NotifierSet       (fan-out, failures logged per sink)
//!        -> LogNotifier
//!        -> JsonlNotifier
//!        -> WebhookNotifier (retry with exponential backoff)
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aegis_common::AlertPriority;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::NotifyError;

pub const DEFAULT_TITLE: &str = "Aegis";
pub const DEFAULT_BODY: &str = "Event detected";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: AlertPriority,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl Notification {
    /// Builds a notification; blank titles and bodies get the generic text.
    pub fn new(title: impl Into<String>, body: impl Into<String>, priority: AlertPriority) -> Self {
        let title = non_blank(title.into(), DEFAULT_TITLE);
        let body = non_blank(body.into(), DEFAULT_BODY);
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        Self {
            title,
            body,
            priority,
            created_at,
        }
    }
}

fn non_blank(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// NotifierSet (fan-out)
// ---------------------------------------------------------------------------

/// Delivers each notification to every sink in registration order. One
/// failing sink does not stop the others.
#[derive(Default)]
pub struct NotifierSet {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn add(&mut self, sink: Arc<dyn Notifier>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierSet {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(err) = sink.create(notification).await {
                warn!(sink = index, %err, title = %notification.title, "notification sink failed");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            priority = ?notification.priority,
            "notification"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlNotifier
// ---------------------------------------------------------------------------

/// Appends each notification as one JSON line. The file is reopened in
/// append mode for every write so it can be rotated externally.
pub struct JsonlNotifier {
    path: PathBuf,
}

impl JsonlNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Notifier for JsonlNotifier {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(notification)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryNotifier
// ---------------------------------------------------------------------------

/// Keeps every notification in memory. Used by the session replay and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    received: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(received) => received.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.received.lock() {
            Ok(mut received) => received.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// POSTs each notification as JSON, retrying failures with exponential backoff.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    async fn post_once(&self, body: &[u8]) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(notification)?;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            let err = match self.post_once(&body).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if attempt == self.config.max_retries {
                return Err(NotifyError::RetryExhausted {
                    attempts: attempt + 1,
                    last_error: Box::new(err),
                });
            }
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                %err,
                backoff_ms = backoff.as_millis() as u64,
                "webhook delivery failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        Ok(())
    }
}
