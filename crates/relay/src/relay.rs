use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aegis_common::messages::DOM_EVENT_NAME;
use aegis_common::runtime::{PrivilegedCommand, RuntimeMessage, RuntimePort};
use aegis_common::{AlertPacket, PacketBody, TargetTag, TrackedAddress, WatchListStore};
use aegis_inpage::window::DomEvent;
use aegis_inpage::Window;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dedup::SeenPackets;

/// Counters exposed for tests and the session summary.
#[derive(Debug, Default)]
pub struct RelayStats {
    forwarded: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
}

impl RelayStats {
    /// Alerts handed to the background.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Second copies dropped by packet id.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Watch-list writes refused because the address was malformed.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub struct ContentRelay {
    window: Arc<Window>,
    store: Arc<dyn WatchListStore>,
    runtime: RuntimePort,
    seen: Mutex<SeenPackets>,
    stats: RelayStats,
}

impl ContentRelay {
    pub fn new(window: Arc<Window>, store: Arc<dyn WatchListStore>, runtime: RuntimePort) -> Arc<Self> {
        Arc::new(Self {
            window,
            store,
            runtime,
            seen: Mutex::new(SeenPackets::default()),
            stats: RelayStats::default(),
        })
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Subscribes to both page channels and starts the relay loop.
    ///
    /// Subscriptions are taken before this returns, so packets emitted right
    /// after `spawn` are not missed.
    pub fn spawn(self: &Arc<Self>, commands: mpsc::UnboundedReceiver<PrivilegedCommand>) -> RelayHandle {
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let messages = self.window.subscribe_messages();
        let events = self.window.document().subscribe_events();
        tasks.spawn(self.clone().run(messages, events, commands, shutdown.clone(), tasks.clone()));
        RelayHandle { shutdown, tasks }
    }

    async fn run(
        self: Arc<Self>,
        mut messages: broadcast::Receiver<Value>,
        mut events: broadcast::Receiver<DomEvent>,
        mut commands: mpsc::UnboundedReceiver<PrivilegedCommand>,
        shutdown: CancellationToken,
        tasks: TaskTracker,
    ) {
        info!(origin = self.window.origin(), "content relay started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = messages.recv() => match message {
                    Ok(value) => self.accept(&value, &tasks),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "relay message listener lagged"),
                    Err(RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(event) if event.name == DOM_EVENT_NAME => self.accept(&event.detail, &tasks),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "relay event listener lagged"),
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("background command channel closed");
                        break;
                    }
                },
            }
        }
        debug!("content relay stopped");
    }

    /// Decodes one wire value from either channel and dispatches it once.
    fn accept(self: &Arc<Self>, value: &Value, tasks: &TaskTracker) {
        let Some(packet) = AlertPacket::from_wire(value) else {
            return;
        };
        if packet.target != TargetTag::Relay {
            return;
        }
        let first = match self.seen.lock() {
            Ok(mut seen) => seen.first_sighting(packet.id),
            Err(poisoned) => poisoned.into_inner().first_sighting(packet.id),
        };
        if !first {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(id = %packet.id, packet = packet.body.type_name(), "dropping duplicate packet");
            return;
        }

        match packet.body {
            PacketBody::TransactionDetected(payload) => {
                debug!(title = %payload.title, "forwarding alert to background");
                if self.runtime.send(RuntimeMessage::Notify {
                    title: payload.title,
                    body: payload.body,
                    priority: payload.priority,
                }) {
                    self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                } else {
                    warn!("background is gone, alert dropped");
                }
            }
            PacketBody::TrackAddressRequest { address } => {
                let Some(address) = self.validate(&address) else {
                    return;
                };
                let runtime = self.runtime.clone();
                tasks.spawn(async move {
                    let reply = runtime.request(RuntimeMessage::AddAddress { address }).await;
                    debug!(%address, ok = reply.ok, "track request answered");
                });
            }
            PacketBody::AddressListQuery => {
                let relay = self.clone();
                tasks.spawn(async move { relay.answer_query().await });
            }
            PacketBody::AddressAdd { address } => {
                let Some(address) = self.validate(&address) else {
                    return;
                };
                let relay = self.clone();
                tasks.spawn(async move {
                    match relay.store.add(address).await {
                        Ok(added) => debug!(%address, added, "watch-list add"),
                        Err(err) => warn!(%address, %err, "watch-list add failed"),
                    }
                    relay.answer_query().await;
                });
            }
            PacketBody::AddressRemove { address } => {
                let Some(address) = self.validate(&address) else {
                    return;
                };
                let relay = self.clone();
                tasks.spawn(async move {
                    match relay.store.remove(address).await {
                        Ok(removed) => debug!(%address, removed, "watch-list remove"),
                        Err(err) => warn!(%address, %err, "watch-list remove failed"),
                    }
                    relay.answer_query().await;
                });
            }
            other => debug!(packet = other.type_name(), "ignoring packet addressed to relay"),
        }
    }

    fn validate(&self, raw: &str) -> Option<TrackedAddress> {
        match TrackedAddress::parse_input(raw) {
            Ok(address) => Some(address),
            Err(err) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(raw, %err, "rejecting watch-list address");
                None
            }
        }
    }

    /// Reads the store and posts the list to the page. A failed read answers
    /// with an empty list.
    async fn answer_query(&self) {
        let addresses = match self.store.get().await {
            Ok(addresses) => addresses,
            Err(err) => {
                warn!(%err, "watch-list read failed, answering empty");
                Vec::new()
            }
        };
        self.post_list(&addresses);
    }

    fn post_list(&self, addresses: &[TrackedAddress]) {
        let packet = AlertPacket::new(
            TargetTag::Page,
            PacketBody::AddressListResponse {
                addresses: addresses.iter().map(ToString::to_string).collect(),
            },
        );
        if let Err(err) = self.window.post_message(packet.to_wire()) {
            warn!(%err, "could not post watch-list to page");
        }
    }

    fn on_command(&self, command: PrivilegedCommand) {
        match command {
            PrivilegedCommand::ToggleUi => {
                if let Some(toggle) = self.window.exposed_toggle() {
                    debug!("toggling page UI directly");
                    toggle();
                    return;
                }
                let packet = AlertPacket::new(TargetTag::Page, PacketBody::ToggleUi);
                if let Err(err) = self.window.post_message(packet.to_wire()) {
                    warn!(%err, "could not forward UI toggle to page");
                }
            }
            PrivilegedCommand::WatchListChanged(addresses) => {
                debug!(count = addresses.len(), "pushing watch-list delta to page");
                self.post_list(&addresses);
            }
        }
    }
}

/// Running relay. Dropping the handle leaves the relay running.
pub struct RelayHandle {
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RelayHandle {
    /// Stops the relay loop and waits for in-flight round trips to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
