//! Privileged background service.
//!
//! Consumes the relay's runtime traffic: alerts become host notifications,
//! watch-list writes are persisted and the resulting list is pushed back
//! down to the relay.

use std::sync::Arc;

use aegis_common::runtime::{PrivilegedCommand, RuntimeEnvelope, RuntimeMessage, RuntimeReply};
use aegis_common::{AlertPriority, TrackedAddress, WatchListStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notifier::{DEFAULT_TITLE, Notification, Notifier};

pub struct BackgroundService {
    store: Arc<dyn WatchListStore>,
    notifier: Arc<dyn Notifier>,
    relay: mpsc::UnboundedSender<PrivilegedCommand>,
}

impl BackgroundService {
    pub fn new(
        store: Arc<dyn WatchListStore>,
        notifier: Arc<dyn Notifier>,
        relay: mpsc::UnboundedSender<PrivilegedCommand>,
    ) -> Self {
        Self {
            store,
            notifier,
            relay,
        }
    }

    pub fn store(&self) -> &Arc<dyn WatchListStore> {
        &self.store
    }

    /// Serves the runtime port until `shutdown` fires or every relay hangs up.
    pub async fn run(&self, mut inbox: mpsc::UnboundedReceiver<RuntimeEnvelope>, shutdown: CancellationToken) {
        info!("background service started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => {
                        debug!("runtime port closed");
                        break;
                    }
                },
            }
        }
        debug!("background service stopped");
    }

    /// Handles one envelope and answers its reply slot, if any.
    pub async fn handle(&self, envelope: RuntimeEnvelope) {
        let reply = match envelope.message {
            RuntimeMessage::Notify { title, body, priority } => {
                self.notify(Notification::new(title, body, priority)).await;
                RuntimeReply { ok: true }
            }
            RuntimeMessage::AddAddress { address } => self.add_address(address).await,
        };
        if let Some(slot) = envelope.reply
            && slot.send(reply).is_err()
        {
            debug!("runtime caller gave up before the reply");
        }
    }

    pub async fn add_address(&self, address: TrackedAddress) -> RuntimeReply {
        match self.store.add(address).await {
            Ok(added) => {
                info!(%address, added, "monitoring address");
                self.notify(Notification::new(
                    DEFAULT_TITLE,
                    format!("Monitoring {address}"),
                    AlertPriority::Low,
                ))
                .await;
                self.push_watch_list().await;
                RuntimeReply { ok: true }
            }
            Err(err) => {
                warn!(%address, %err, "could not persist watch-list address");
                RuntimeReply { ok: false }
            }
        }
    }

    /// Operator-side removal. Page removals never reach the background: the
    /// relay writes those to the shared store itself.
    pub async fn remove_address(&self, address: TrackedAddress) -> RuntimeReply {
        match self.store.remove(address).await {
            Ok(removed) => {
                info!(%address, removed, "stopped monitoring address");
                self.push_watch_list().await;
                RuntimeReply { ok: true }
            }
            Err(err) => {
                warn!(%address, %err, "could not remove watch-list address");
                RuntimeReply { ok: false }
            }
        }
    }

    /// Asks the relay to toggle the page UI. Returns `false` if no relay is listening.
    pub fn toggle_ui(&self) -> bool {
        self.relay.send(PrivilegedCommand::ToggleUi).is_ok()
    }

    async fn push_watch_list(&self) {
        match self.store.get().await {
            Ok(addresses) => {
                if self.relay.send(PrivilegedCommand::WatchListChanged(addresses)).is_err() {
                    debug!("no relay listening for watch-list deltas");
                }
            }
            Err(err) => warn!(%err, "could not read watch-list for delta"),
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(err) = self.notifier.create(&notification).await {
            warn!(%err, title = %notification.title, "notification failed");
        }
    }
}
