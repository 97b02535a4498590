//! The guard's page context.
//!
//! [`PageContext::install`] is the injected script's entry point. It wraps
//! every provider it can find, keeps a read-only mirror of the watch-list,
//! and publishes alerts through the [`AlertEmitter`]. Discovery, page events
//! and the rescan timers run as tasks on the context's tracker and stop when
//! the page unloads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use aegis_common::{
    AddressError, AlertPacket, AlertPayload, AlertPriority, PacketBody, RequestArguments,
    RpcMethod, TargetTag, TrackedAddress,
};
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::activity::{ACTIVITY_BUCKET, ActivityEntry, ActivityKey, RecentActivity};
use crate::classifier::{Classification, TransactionDescriptor, TxKind, classify};
use crate::config::{PageConfig, VerificationConfig};
use crate::discovery::{self, SweepReport};
use crate::emitter::{AlertEmitter, Delivery};
use crate::error::{ObservationError, ProviderError};
use crate::interceptor::RequestObserver;
use crate::registry::HookRegistry;
use crate::tracking::{TrackedMatch, match_tracked};
use crate::verification::{
    ContractLookup, PatternRiskScorer, RiskCache, RiskScorer, VerificationCache,
    VerificationRecord,
};
use crate::window::{Element, ProviderObject, Window};
use crate::{listener, rpc_monitor, scheduler};

/// Marker set on the window once the guard is installed.
pub const INJECTION_KEY: &str = "aegis-inpage";

pub const UNVERIFIED_TITLE: &str = "UNVERIFIED CONTRACT";
pub const HIGH_RISK_TITLE: &str = "HIGH RISK CONTRACT";

/// Collaborators the page context cannot build itself.
pub struct PageServices {
    /// Contract verification; `None` disables lookups.
    pub lookup: Option<Arc<dyn ContractLookup>>,
    pub scorer: Arc<dyn RiskScorer>,
}

impl Default for PageServices {
    fn default() -> Self {
        Self {
            lookup: None,
            scorer: Arc::new(PatternRiskScorer),
        }
    }
}

/// Where an observed transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Provider,
    RpcBody,
}

pub struct PageContext {
    window: Arc<Window>,
    config: PageConfig,
    registry: HookRegistry,
    observer: Arc<dyn RequestObserver>,
    watch_list: RwLock<FxHashSet<TrackedAddress>>,
    verifier: Option<Arc<VerificationCache>>,
    risk: RiskCache,
    activity: RecentActivity,
    emitter: AlertEmitter,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    ui_visible: AtomicBool,
    this: Weak<PageContext>,
}

impl PageContext {
    /// Installs the guard into `window`.
    ///
    /// Returns `None` if a guard is already installed there. Must be called
    /// from within a tokio runtime.
    pub fn install(
        window: Arc<Window>,
        config: PageConfig,
        verification: &VerificationConfig,
        services: PageServices,
    ) -> Option<Arc<Self>> {
        if !window.mark_injected(INJECTION_KEY) {
            info!(origin = window.origin(), "page guard already installed, skipping");
            return None;
        }

        let verifier = services
            .lookup
            .filter(|_| verification.enabled)
            .map(|lookup| Arc::new(VerificationCache::with_freshness(lookup, verification.freshness())));
        let page = Arc::new_cyclic(|this: &Weak<PageContext>| Self {
            emitter: AlertEmitter::new(window.clone()),
            activity: RecentActivity::new(config.activity_limit, ACTIVITY_BUCKET),
            risk: RiskCache::with_freshness(services.scorer, verification.risk_freshness()),
            observer: Arc::new(GuardObserver { page: this.clone() }),
            window,
            config,
            registry: HookRegistry::new(),
            watch_list: RwLock::new(FxHashSet::default()),
            verifier,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            ui_visible: AtomicBool::new(false),
            this: this.clone(),
        });

        let weak = Arc::downgrade(&page);
        page.window.expose_toggle(Arc::new(move || {
            if let Some(page) = weak.upgrade() {
                page.toggle_ui();
            }
        }));

        let report = page.rescan();
        info!(
            origin = page.window.origin(),
            hooked = report.hooked.len(),
            skipped = report.skipped.len(),
            "page guard installed"
        );

        // Subscribe before spawning so nothing posted right after install is missed.
        let messages = page.window.subscribe_messages();
        let events = page.window.subscribe_events();
        let mutations = page.window.document().subscribe_mutations();
        page.tasks.spawn(listener::run(page.clone(), messages, events));
        page.tasks.spawn(scheduler::run(page.clone(), mutations));
        let refresher = page.clone();
        page.tasks.spawn(async move {
            refresher.refresh_watch_list().await;
        });
        Some(page)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> Option<&Arc<VerificationCache>> {
        self.verifier.as_ref()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    pub fn rescan(&self) -> SweepReport {
        discovery::sweep(&self.window, &self.registry, &self.observer)
    }

    /// Hooks a provider handed over by an `eip6963:announceProvider` event.
    pub fn hook_announced(&self, provider: &Arc<ProviderObject>) -> SweepReport {
        let mut report = SweepReport::default();
        discovery::hook_candidate(&self.registry, &self.observer, provider, "eip6963", &mut report);
        report
    }

    // -----------------------------------------------------------------------
    // Watch-list mirror
    // -----------------------------------------------------------------------

    pub fn is_tracked(&self, address: &TrackedAddress) -> bool {
        read(&self.watch_list).contains(address)
    }

    pub fn watch_list(&self) -> Vec<TrackedAddress> {
        let mut addresses: Vec<_> = read(&self.watch_list).iter().copied().collect();
        addresses.sort();
        addresses
    }

    /// Replaces the mirror. Entries that fail validation are dropped.
    pub fn replace_watch_list(&self, addresses: &[String]) -> usize {
        let parsed: FxHashSet<TrackedAddress> = addresses
            .iter()
            .filter_map(|raw| match TrackedAddress::parse_input(raw) {
                Ok(address) => Some(address),
                Err(err) => {
                    warn!(raw = %raw, %err, "ignoring malformed watch-list entry");
                    None
                }
            })
            .collect();
        let count = parsed.len();
        *write(&self.watch_list) = parsed;
        debug!(count, "watch-list mirror replaced");
        count
    }

    /// Asks the relay for the watch-list and waits up to the relay timeout.
    ///
    /// A timeout yields an empty list and leaves the mirror as it was.
    pub async fn refresh_watch_list(&self) -> Vec<TrackedAddress> {
        // Subscribe before asking so the reply cannot slip past.
        let mut replies = self.window.subscribe_messages();
        let delivery = self.emitter.emit(PacketBody::AddressListQuery);
        if !delivery.any() {
            return Vec::new();
        }

        let wait = async {
            loop {
                match replies.recv().await {
                    Ok(value) => {
                        if let Some(AlertPacket {
                            target: TargetTag::Page,
                            body: PacketBody::AddressListResponse { addresses },
                            ..
                        }) = AlertPacket::from_wire(&value)
                        {
                            return Some(addresses);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "watch-list reply wait lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        let addresses = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            reply = tokio::time::timeout(self.config.relay_timeout(), wait) => reply.ok().flatten(),
        };
        match addresses {
            Some(addresses) => {
                self.replace_watch_list(&addresses);
                self.watch_list()
            }
            None => {
                debug!(
                    timeout_ms = self.config.relay_timeout().as_millis() as u64,
                    "watch-list query went unanswered"
                );
                Vec::new()
            }
        }
    }

    /// Adds a user-supplied address from the page UI.
    pub fn add_tracked_address(&self, input: &str) -> Result<TrackedAddress, AddressError> {
        let address = TrackedAddress::parse_input(input)?;
        write(&self.watch_list).insert(address);
        self.emitter.emit(PacketBody::AddressAdd {
            address: address.to_string(),
        });
        info!(%address, "address added from page");
        Ok(address)
    }

    pub fn remove_tracked_address(&self, input: &str) -> Result<TrackedAddress, AddressError> {
        let address = TrackedAddress::parse_input(input)?;
        write(&self.watch_list).remove(&address);
        self.emitter.emit(PacketBody::AddressRemove {
            address: address.to_string(),
        });
        info!(%address, "address removed from page");
        Ok(address)
    }

    // -----------------------------------------------------------------------
    // UI state
    // -----------------------------------------------------------------------

    pub fn toggle_ui(&self) -> bool {
        let visible = !self.ui_visible.fetch_xor(true, Ordering::AcqRel);
        debug!(visible, "dropdown toggled");
        visible
    }

    pub fn ui_visible(&self) -> bool {
        self.ui_visible.load(Ordering::Acquire)
    }

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.activity.snapshot()
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Emits a low-confidence alert for a signal not tied to an intercepted call.
    pub fn page_signal(&self, title: &str, body: &str) -> Delivery {
        self.emitter
            .alert(AlertPayload::new(title, body, AlertPriority::Low))
    }

    /// Hands a raw JSON-RPC body sent by page code to the RPC monitor.
    pub fn inspect_rpc_body(&self, url: &str, body: &str) {
        if !rpc_monitor::looks_like_rpc_endpoint(url) {
            return;
        }
        for classification in rpc_monitor::extract_transactions(body) {
            match classification {
                Classification::Transaction(descriptor) => {
                    self.observe_transaction(descriptor, Origin::RpcBody);
                }
                Classification::Undescribed { from } => {
                    let details = json!({ "from": from, "url": url });
                    if !self.alert_if_tracked(from.as_deref(), None, details, Origin::RpcBody) {
                        self.page_signal("RPC Transaction", "Transaction via RPC fetch request");
                    }
                }
                _ => {}
            }
        }
    }

    fn observe_request(&self, args: &RequestArguments) -> Result<(), ObservationError> {
        if self.is_shut_down() {
            return Err(ObservationError::ShuttingDown);
        }
        let method = RpcMethod::parse(&args.method);
        let first = args.first_param();
        if method == RpcMethod::SendTransaction && !first.is_some_and(Value::is_object) {
            return Err(ObservationError::MalformedParams {
                method: args.method.clone(),
                field: "params[0]",
            });
        }

        match classify(&method, first) {
            Classification::Transaction(descriptor) => {
                self.observe_transaction(descriptor, Origin::Provider);
            }
            Classification::Undescribed { from } => {
                let details = json!({ "from": from });
                self.alert_if_tracked(from.as_deref(), None, details, Origin::Provider);
            }
            Classification::ReviewBeforeSigning(kind) => {
                self.emitter.alert(kind.alert());
            }
            Classification::AccountRequest | Classification::Passthrough => {}
        }
        Ok(())
    }

    fn observe_response(
        &self,
        args: &RequestArguments,
        result: &Result<Value, ProviderError>,
    ) -> Result<(), ObservationError> {
        if RpcMethod::parse(&args.method) != RpcMethod::RequestAccounts {
            return Ok(());
        }
        let Ok(accounts) = result else {
            return Ok(());
        };
        let Some(first) = accounts.as_array().and_then(|a| a.first()).and_then(Value::as_str)
        else {
            return Ok(());
        };
        let address = TrackedAddress::parse_input(first).map_err(|_| {
            ObservationError::MalformedParams {
                method: args.method.clone(),
                field: "result[0]",
            }
        })?;
        info!(%address, "connected account, requesting tracking");
        self.emitter.emit(PacketBody::TrackAddressRequest {
            address: address.to_string(),
        });
        Ok(())
    }

    fn observe_transaction(&self, descriptor: TransactionDescriptor, origin: Origin) {
        debug!(
            kind = %descriptor.kind,
            label = descriptor.label(),
            to = ?descriptor.to,
            ?origin,
            "transaction observed"
        );
        let tracked = self.tracked_match(descriptor.from.as_deref(), descriptor.to.as_deref());
        if let Some(hit) = &tracked {
            self.emit_tracked(hit, descriptor.details(), origin);
        }
        let key = self.activity.record(&descriptor);

        let contract = match (descriptor.kind, descriptor.to.as_deref()) {
            (TxKind::ContractCall, Some(to)) => TrackedAddress::parse_input(to).ok(),
            _ => None,
        };
        match (contract, self.verifier.clone(), self.this.upgrade()) {
            (Some(contract), Some(verifier), Some(page)) => {
                let shutdown = self.shutdown.clone();
                self.tasks.spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        record = verifier.verify(contract) => {
                            page.on_verified(&descriptor, key.as_ref(), tracked, &record, origin);
                        }
                    }
                });
            }
            _ if tracked.is_none() && origin == Origin::RpcBody => {
                self.page_signal("RPC Transaction", "Transaction via RPC fetch request");
            }
            _ => {}
        }
    }

    fn on_verified(
        &self,
        descriptor: &TransactionDescriptor,
        key: Option<&ActivityKey>,
        tracked: Option<TrackedMatch>,
        record: &VerificationRecord,
        origin: Origin,
    ) {
        if let Some(key) = key {
            self.activity.attach_verification(key, record);
        }
        let contract = record.address;
        let mut details = descriptor.details();
        if let Value::Object(map) = &mut details {
            map.insert("verification".into(), json!(record));
        }

        if !record.is_verified {
            let via = match origin {
                Origin::Provider => "",
                Origin::RpcBody => " via RPC",
            };
            self.emitter.alert(
                AlertPayload::new(
                    UNVERIFIED_TITLE,
                    format!(
                        "{} call{via} to unverified contract {contract} on {} - source code not available",
                        descriptor.label(),
                        record.network
                    ),
                    AlertPriority::Medium,
                )
                .with_details(details),
            );
            return;
        }

        let (Some(_), Some(source)) = (tracked, record.verified_source()) else {
            if origin == Origin::RpcBody && tracked.is_none() {
                self.page_signal(
                    "RPC Transaction",
                    &format!("RPC call to verified contract {contract}"),
                );
            }
            return;
        };
        let assessment = self.risk.assess(contract, source);
        if let Some(key) = key {
            self.activity.attach_risk(key, assessment.level);
        }
        if assessment.level.is_alarming() {
            if let Value::Object(map) = &mut details {
                map.insert("risk".into(), json!(assessment));
            }
            self.emitter.alert(
                AlertPayload::new(
                    HIGH_RISK_TITLE,
                    format!("{contract} ({}): {}", assessment.level, assessment.summary),
                    AlertPriority::High,
                )
                .with_details(details),
            );
        }
    }

    fn tracked_match(&self, from: Option<&str>, to: Option<&str>) -> Option<TrackedMatch> {
        let mirror = read(&self.watch_list);
        match_tracked(from, to, |address| mirror.contains(address))
    }

    fn alert_if_tracked(&self, from: Option<&str>, to: Option<&str>, details: Value, origin: Origin) -> bool {
        match self.tracked_match(from, to) {
            Some(hit) => {
                self.emit_tracked(&hit, details, origin);
                true
            }
            None => false,
        }
    }

    fn emit_tracked(&self, hit: &TrackedMatch, details: Value, origin: Origin) {
        warn!(direction = %hit.direction, address = %hit.address, "tracked address transaction");
        let alert = match origin {
            Origin::Provider => hit.alert(details),
            Origin::RpcBody => hit.rpc_alert("RPC", details),
        };
        self.emitter.alert(alert);
    }

    // -----------------------------------------------------------------------
    // Buttons
    // -----------------------------------------------------------------------

    /// Attaches click observers to transaction-looking buttons among the
    /// given elements and their descendants. Returns how many were attached.
    pub fn observe_buttons(&self, added: &[Arc<Element>]) -> usize {
        let mut attached = 0;
        for root in added {
            for element in root.subtree() {
                if !scheduler::is_transaction_button(&element)
                    || element.attribute(scheduler::OBSERVED_MARKER).is_some()
                {
                    continue;
                }
                element.set_attribute(scheduler::OBSERVED_MARKER, "1");
                let page = self.this.clone();
                element.add_click_listener(Arc::new(move || {
                    if let Some(page) = page.upgrade() {
                        page.page_signal(
                            "Transaction Button Clicked",
                            "Transaction button was clicked - review carefully",
                        );
                    }
                }));
                attached += 1;
            }
        }
        if attached > 0 {
            debug!(attached, "transaction buttons observed");
        }
        attached
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Stops every task and forgets page state. In-flight lookups are abandoned.
    pub fn teardown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.tasks.close();
        self.registry.clear();
        self.activity.clear();
        self.window.clear_toggle();
        self.window.unmark_injected(INJECTION_KEY);
        info!(origin = self.window.origin(), "page guard torn down");
    }

    /// Tears down and waits for the tasks to finish, up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.teardown();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!("page tasks did not stop within the grace period");
        }
    }
}

/// Observer installed into every wrapped dispatch. Holds the page weakly so
/// a wrapped provider never keeps a torn-down guard alive.
struct GuardObserver {
    page: Weak<PageContext>,
}

impl RequestObserver for GuardObserver {
    fn before_dispatch(&self, label: &str, args: &RequestArguments) -> Result<(), ObservationError> {
        let page = self.page.upgrade().ok_or(ObservationError::ShuttingDown)?;
        debug!(label, method = %args.method, "wallet request intercepted");
        page.observe_request(args)
    }

    fn after_dispatch(
        &self,
        _label: &str,
        args: &RequestArguments,
        result: &Result<Value, ProviderError>,
    ) -> Result<(), ObservationError> {
        let page = self.page.upgrade().ok_or(ObservationError::ShuttingDown)?;
        page.observe_response(args, result)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
