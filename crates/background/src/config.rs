//! Background-context configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notifier::WebhookConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Watch-list file (None = in-memory watch-list).
    pub store_path: Option<PathBuf>,
    pub notifications: NotificationConfig,
    pub transfers: TransferConfig,
}

/// Where host notifications go. Every enabled sink receives every notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Log notifications through `tracing` (default: true).
    pub log: bool,
    /// Append notifications to this JSON Lines file.
    pub jsonl_path: Option<PathBuf>,
    /// POST notifications to this URL.
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub webhook_max_retries: u32,
    pub webhook_initial_backoff_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            jsonl_path: None,
            webhook_url: None,
            webhook_timeout_secs: 5,
            webhook_max_retries: 3,
            webhook_initial_backoff_ms: 1000,
        }
    }
}

impl NotificationConfig {
    pub fn webhook(&self) -> Option<WebhookConfig> {
        let url = self.webhook_url.clone()?;
        Some(WebhookConfig {
            url,
            timeout: Duration::from_secs(self.webhook_timeout_secs),
            max_retries: self.webhook_max_retries,
            initial_backoff: Duration::from_millis(self.webhook_initial_backoff_ms),
        })
    }
}

/// ERC-20 transfer watcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// JSON-RPC endpoint to poll (None = watcher disabled).
    pub rpc_url: Option<String>,
    /// Poll period (default: 12 s, about one block).
    pub poll_interval_secs: u64,
    /// Widest block range requested in one `eth_getLogs` call (default: 1000).
    pub max_block_range: u64,
    /// Per-request HTTP timeout (default: 10 s).
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            poll_interval_secs: 12,
            max_block_range: 1000,
            request_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_is_off_without_url() {
        let config = NotificationConfig::default();
        assert!(config.webhook().is_none());
        let config = NotificationConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..NotificationConfig::default()
        };
        let webhook = config.webhook().unwrap();
        assert_eq!(webhook.max_retries, 3);
        assert_eq!(webhook.initial_backoff, Duration::from_secs(1));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BackgroundConfig =
            serde_json::from_str(r#"{ "transfers": { "rpc_url": "http://localhost:8545" } }"#).unwrap();
        assert_eq!(config.transfers.poll_interval(), Duration::from_secs(12));
        assert!(config.notifications.log);
        assert!(config.store_path.is_none());
    }
}
