//! Privileged background context: the persistent watch-list, host
//! notifications, the relay command path and the ERC-20 transfer watcher.

pub mod config;
pub mod error;
pub mod notifier;
pub mod rpc;
pub mod service;
pub mod store;
pub mod transfers;

pub use config::{BackgroundConfig, NotificationConfig, TransferConfig};
pub use error::{NotifyError, RpcError};
pub use notifier::{
    JsonlNotifier, LogNotifier, MemoryNotifier, Notification, Notifier, NotifierSet, WebhookConfig,
    WebhookNotifier,
};
pub use service::BackgroundService;
pub use store::JsonFileWatchList;
pub use transfers::TransferWatcher;
