//! In-process session: a page, its relay and the background service wired
//! together, driven by a scripted wallet.
//!
//! A script is a JSON file:
//!
//! ```json
//! {
//!   "origin": "https://app.example",
//!   "chain_id": 11155111,
//!   "accounts": ["0x…"],
//!   "requests": [
//!     { "method": "eth_requestAccounts" },
//!     { "method": "eth_sendTransaction", "params": [{ "from": "0x…", "to": "0x…", "value": "0x1" }] }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aegis_background::{BackgroundService, Notifier};
use aegis_common::runtime::RuntimePort;
use aegis_common::{RequestArguments, TrackedAddress, WatchListStore};
use aegis_inpage::activity::ActivityEntry;
use aegis_inpage::verification::ContractLookup;
use aegis_inpage::{PageContext, PageServices, ProviderError, ProviderObject, RequestDispatch, Window};
use aegis_relay::{ContentRelay, RelayHandle};
use eyre::OptionExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AegisConfig;

/// Time allowed for alerts to cross page → relay → background after a request.
const SETTLE: Duration = Duration::from_millis(100);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub accounts: Vec<String>,
    pub requests: Vec<ScriptedRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedRequest {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

fn default_origin() -> String {
    "https://dapp.local".to_string()
}

fn default_chain_id() -> u64 {
    1
}

impl Script {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Wallet that answers from the script instead of signing anything.
pub struct ScriptedWallet {
    accounts: Vec<String>,
    chain_id: u64,
    nonce: AtomicU64,
}

impl ScriptedWallet {
    pub fn new(accounts: Vec<String>, chain_id: u64) -> Self {
        Self {
            accounts,
            chain_id,
            nonce: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl RequestDispatch for ScriptedWallet {
    async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        match args.method.as_str() {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(self.accounts)),
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id))),
            "eth_sendTransaction" | "eth_sendRawTransaction" => {
                let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
                Ok(json!(format!("0x{nonce:064x}")))
            }
            "eth_signTransaction" | "personal_sign" => Ok(json!(format!("0x{}", "00".repeat(65)))),
            method if method.starts_with("eth_signTypedData") => Ok(json!(format!("0x{}", "00".repeat(65)))),
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    fn signature(&self) -> String {
        "aegis::scripted-wallet".to_string()
    }
}

/// Collaborators a session is built from.
pub struct SessionParts {
    pub store: Arc<dyn WatchListStore>,
    pub notifier: Arc<dyn Notifier>,
    pub lookup: Option<Arc<dyn ContractLookup>>,
}

pub struct Session {
    window: Arc<Window>,
    page: Arc<PageContext>,
    relay: Arc<ContentRelay>,
    relay_handle: RelayHandle,
    service: Arc<BackgroundService>,
    shutdown: CancellationToken,
    background: JoinHandle<()>,
}

impl Session {
    /// Starts the background, the relay and the page guard on `window`, in
    /// that order, and waits for the page's first watch-list mirror.
    pub async fn start(window: Arc<Window>, config: &AegisConfig, parts: SessionParts) -> eyre::Result<Self> {
        let shutdown = CancellationToken::new();

        let (runtime_tx, inbox) = mpsc::unbounded_channel();
        let port = RuntimePort::with_timeout(runtime_tx, config.page.relay_timeout());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let service = Arc::new(BackgroundService::new(
            parts.store.clone(),
            parts.notifier,
            commands_tx,
        ));
        let background = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.run(inbox, shutdown).await })
        };

        let relay = ContentRelay::new(window.clone(), parts.store, port);
        let relay_handle = relay.spawn(commands_rx);

        let page = PageContext::install(
            window.clone(),
            config.page.clone(),
            &config.verification,
            PageServices {
                lookup: parts.lookup,
                ..PageServices::default()
            },
        )
        .ok_or_eyre("a page guard is already installed in this window")?;
        let mirrored = page.refresh_watch_list().await;
        info!(origin = window.origin(), watched = mirrored.len(), "session started");

        Ok(Self {
            window,
            page,
            relay,
            relay_handle,
            service,
            shutdown,
            background,
        })
    }

    pub fn page(&self) -> &Arc<PageContext> {
        &self.page
    }

    pub fn relay(&self) -> &Arc<ContentRelay> {
        &self.relay
    }

    pub fn service(&self) -> &Arc<BackgroundService> {
        &self.service
    }

    /// Sends one request through `window.ethereum` and waits for the alerts
    /// it raised to reach the background.
    pub async fn request(&self, request: &ScriptedRequest) -> Result<Value, ProviderError> {
        let provider = self
            .window
            .global("ethereum")
            .ok_or_else(ProviderError::disconnected)?;
        let result = provider
            .request(RequestArguments::new(&request.method, request.params.clone()))
            .await;
        debug!(method = %request.method, ok = result.is_ok(), "scripted request answered");
        tokio::time::sleep(SETTLE).await;
        result
    }

    pub async fn shutdown(self) {
        self.page.shutdown(SHUTDOWN_GRACE).await;
        self.relay_handle.shutdown().await;
        self.shutdown.cancel();
        let _ = self.background.await;
    }
}

/// What a replayed script left behind.
#[derive(Debug)]
pub struct SessionReport {
    pub results: Vec<Result<Value, ProviderError>>,
    pub activity: Vec<ActivityEntry>,
    pub watch_list: Vec<TrackedAddress>,
    pub alerts_forwarded: u64,
}

/// A fresh window for `script`, with its scripted wallet at `window.ethereum`.
pub fn scripted_window(script: &Script) -> Arc<Window> {
    let window = Window::new(script.origin.clone());
    let wallet = Arc::new(ScriptedWallet::new(script.accounts.clone(), script.chain_id));
    window.set_global("ethereum", ProviderObject::new(wallet));
    window
}

/// Replays `script` in `window` (see [`scripted_window`]).
pub async fn replay(
    window: Arc<Window>,
    script: &Script,
    config: &AegisConfig,
    parts: SessionParts,
) -> eyre::Result<SessionReport> {
    let session = Session::start(window, config, parts).await?;
    let mut results = Vec::with_capacity(script.requests.len());
    for request in &script.requests {
        results.push(session.request(request).await);
    }

    let report = SessionReport {
        results,
        activity: session.page().recent_activity(),
        watch_list: session.page().watch_list(),
        alerts_forwarded: session.relay().stats().forwarded(),
    };
    session.shutdown().await;
    Ok(report)
}
