use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aegis_common::{AlertPacket, AlertPayload, PacketBody, RequestArguments, TargetTag, TrackedAddress};
use aegis_inpage::verification::{
    ChainIdSource, ContractLookup, Network, VerificationRecord, WindowChainId,
};
use aegis_inpage::{
    DomEvent, Element, LookupError, PageConfig, PageContext, PageEvent, PageServices, ProviderError,
    ProviderObject, RequestDispatch, VerificationConfig, Window,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;

const ACCOUNT: &str = "0x00000000000000000000000000000000000000Aa";
const RECIPIENT: &str = "0x00000000000000000000000000000000000000bB";
const CONTRACT: &str = "0x00000000000000000000000000000000000000cc";

#[derive(Default)]
struct MockWallet {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl RequestDispatch for MockWallet {
    async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match args.method.as_str() {
            "eth_requestAccounts" => Ok(json!([ACCOUNT])),
            "eth_chainId" => Ok(json!("0x1")),
            "eth_sendTransaction" => Ok(json!("0xfeed")),
            "personal_sign" => Err(ProviderError::user_rejected()),
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    fn signature(&self) -> String {
        "mock-wallet".into()
    }
}

struct FixedLookup {
    verified: bool,
    source: &'static str,
}

#[async_trait::async_trait]
impl ContractLookup for FixedLookup {
    async fn lookup(&self, address: TrackedAddress) -> Result<VerificationRecord, LookupError> {
        let mut record = VerificationRecord::unverified(address, Network::Mainnet);
        record.is_verified = self.verified;
        record.source_code = Some(self.source.to_string());
        record.name = Some("Vault".into());
        Ok(record)
    }
}

/// Answers watch-list queries the way the relay would.
fn spawn_relay_stub(window: Arc<Window>, addresses: Vec<String>) {
    let mut messages = window.subscribe_messages();
    tokio::spawn(async move {
        while let Ok(value) = messages.recv().await {
            let Some(packet) = AlertPacket::from_wire(&value) else {
                continue;
            };
            if packet.target == TargetTag::Relay && packet.body == PacketBody::AddressListQuery {
                let reply = AlertPacket::new(
                    TargetTag::Page,
                    PacketBody::AddressListResponse {
                        addresses: addresses.clone(),
                    },
                );
                let _ = window.post_message(reply.to_wire());
            }
        }
    });
}

fn install(window: &Arc<Window>, services: PageServices) -> Arc<PageContext> {
    PageContext::install(
        window.clone(),
        PageConfig::default(),
        &VerificationConfig::default(),
        services,
    )
    .expect("first install")
}

fn drain(events: &mut broadcast::Receiver<DomEvent>) -> Vec<PacketBody> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Some(packet) = AlertPacket::from_wire(&event.detail) {
            out.push(packet.body);
        }
    }
    out
}

fn alerts(bodies: &[PacketBody]) -> Vec<AlertPayload> {
    bodies
        .iter()
        .filter_map(|body| match body {
            PacketBody::TransactionDetected(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

async fn next_alert(events: &mut broadcast::Receiver<DomEvent>, title: &str) -> AlertPayload {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if let Some(AlertPacket {
                body: PacketBody::TransactionDetected(payload),
                ..
            }) = AlertPacket::from_wire(&event.detail)
                && payload.title == title
            {
                return payload;
            }
        }
    })
    .await
    .expect("alert within deadline")
}

fn wallet_page() -> (Arc<Window>, Arc<MockWallet>, Arc<ProviderObject>) {
    let window = Window::new("https://dapp.example");
    let wallet = Arc::new(MockWallet::default());
    let provider = ProviderObject::new(wallet.clone());
    window.set_global("ethereum", provider.clone());
    (window, wallet, provider)
}

#[tokio::test]
async fn tracked_transfer_raises_exactly_one_alert() {
    let (window, wallet, provider) = wallet_page();
    spawn_relay_stub(window.clone(), vec![ACCOUNT.to_ascii_lowercase()]);
    let page = install(&window, PageServices::default());
    page.refresh_watch_list().await;
    assert_eq!(page.watch_list().len(), 1);

    let mut events = window.document().subscribe_events();
    let result = provider
        .request(RequestArguments::new(
            "eth_sendTransaction",
            Some(json!([{ "from": ACCOUNT.to_ascii_uppercase().replacen("0X", "0x", 1), "to": RECIPIENT, "value": "0x1" }])),
        ))
        .await;
    assert_eq!(result, Ok(json!("0xfeed")));
    assert_eq!(wallet.calls.load(Ordering::SeqCst), 1);

    let raised = alerts(&drain(&mut events));
    assert_eq!(raised.len(), 1, "{raised:?}");
    assert_eq!(raised[0].title, "TRACKED ADDRESS TRANSACTION");
    assert_eq!(
        raised[0].body,
        format!("FROM tracked address: {}", ACCOUNT.to_ascii_lowercase())
    );
    assert_eq!(page.recent_activity().len(), 1);
}

#[tokio::test]
async fn second_install_is_a_no_op() {
    let (window, _, _) = wallet_page();
    let _page = install(&window, PageServices::default());
    assert!(
        PageContext::install(
            window.clone(),
            PageConfig::default(),
            &VerificationConfig::default(),
            PageServices::default(),
        )
        .is_none()
    );
}

#[tokio::test]
async fn repeated_sweeps_keep_a_single_wrapper() {
    let (window, wallet, provider) = wallet_page();
    window.set_global("metamask", provider.clone());
    let page = install(&window, PageServices::default());
    for _ in 0..20 {
        page.rescan();
    }
    assert_eq!(
        provider.dispatch().unwrap().signature(),
        "aegis::intercept(mock-wallet)"
    );

    let mut events = window.document().subscribe_events();
    provider
        .request(RequestArguments::new("personal_sign", Some(json!(["0x68", ACCOUNT]))))
        .await
        .unwrap_err();
    assert_eq!(wallet.calls.load(Ordering::SeqCst), 1);
    let raised = alerts(&drain(&mut events));
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].title, "Signature Request");
}

#[tokio::test]
async fn replaced_provider_is_hooked_again() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());

    let replacement = ProviderObject::new(Arc::new(MockWallet::default()));
    window.set_global("ethereum", replacement.clone());
    let report = page.rescan();
    assert_eq!(report.hooked, ["ethereum"]);

    let mut events = window.document().subscribe_events();
    replacement
        .request(RequestArguments::new("eth_sendRawTransaction", Some(json!(["0xf86c"]))))
        .await
        .unwrap_err();
    assert_eq!(alerts(&drain(&mut events))[0].title, "Raw Transaction");
}

#[tokio::test]
async fn connected_account_is_offered_for_tracking() {
    let (window, _, provider) = wallet_page();
    let _page = install(&window, PageServices::default());
    let mut events = window.document().subscribe_events();

    provider
        .request(RequestArguments::new("eth_requestAccounts", None))
        .await
        .unwrap();
    let bodies = drain(&mut events);
    assert!(bodies.contains(&PacketBody::TrackAddressRequest {
        address: ACCOUNT.to_ascii_lowercase()
    }));
}

#[tokio::test]
async fn malformed_params_still_reach_the_wallet() {
    let (window, wallet, provider) = wallet_page();
    let _page = install(&window, PageServices::default());
    let result = provider
        .request(RequestArguments::new("eth_sendTransaction", Some(json!("garbage"))))
        .await;
    assert_eq!(result, Ok(json!("0xfeed")));
    assert_eq!(wallet.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_watch_list_query_times_out_empty() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());
    let started = tokio::time::Instant::now();
    assert!(page.refresh_watch_list().await.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn unverified_contract_call_is_flagged() {
    let (window, _, provider) = wallet_page();
    let services = PageServices {
        lookup: Some(Arc::new(FixedLookup {
            verified: false,
            source: "",
        })),
        ..PageServices::default()
    };
    let page = install(&window, services);
    let mut events = window.document().subscribe_events();

    provider
        .request(RequestArguments::new(
            "eth_sendTransaction",
            Some(json!([{ "from": RECIPIENT, "to": CONTRACT, "data": "0x095ea7b3" }])),
        ))
        .await
        .unwrap();
    let alert = next_alert(&mut events, "UNVERIFIED CONTRACT").await;
    assert!(alert.body.starts_with("Token Approval call to unverified contract"));
    assert_eq!(page.verifier().unwrap().lookups(), 1);
}

#[tokio::test]
async fn risky_contract_touching_tracked_address_is_flagged() {
    let (window, _, provider) = wallet_page();
    spawn_relay_stub(window.clone(), vec![ACCOUNT.to_string()]);
    let services = PageServices {
        lookup: Some(Arc::new(FixedLookup {
            verified: true,
            source: "contract Vault { function kill() public { selfdestruct(payable(msg.sender)); } }",
        })),
        ..PageServices::default()
    };
    let page = install(&window, services);
    page.refresh_watch_list().await;
    let mut events = window.document().subscribe_events();

    provider
        .request(RequestArguments::new(
            "eth_sendTransaction",
            Some(json!([{ "from": ACCOUNT, "to": CONTRACT, "data": "0xa9059cbb" }])),
        ))
        .await
        .unwrap();
    let alert = next_alert(&mut events, "HIGH RISK CONTRACT").await;
    assert!(alert.body.contains("CRITICAL"), "{}", alert.body);
}

#[tokio::test]
async fn exposed_toggle_flips_the_dropdown() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());
    let toggle = window.exposed_toggle().expect("toggle exposed");
    toggle();
    assert!(page.ui_visible());
    toggle();
    assert!(!page.ui_visible());
}

#[tokio::test]
async fn announced_provider_is_hooked() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());
    let announced = ProviderObject::new(Arc::new(MockWallet::default()));

    window.dispatch_event(PageEvent::AnnounceProvider(announced.clone()));
    tokio::time::timeout(Duration::from_secs(5), async {
        while !page.registry().is_hooked(&announced) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("announced provider hooked");
}

#[tokio::test(start_paused = true)]
async fn inserted_transaction_buttons_are_observed_once() {
    let (window, _, _) = wallet_page();
    let _page = install(&window, PageServices::default());
    let mut events = window.document().subscribe_events();

    let button = Arc::new(Element::new("button").with_attribute("id", "deployContract"));
    let container = Arc::new(Element::new("div"));
    window.document().append(vec![container, button.clone()]);
    window.document().append(vec![button.clone()]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(button.click_listener_count(), 1);
    button.click();
    let alert = next_alert(&mut events, "Transaction Button Clicked").await;
    assert_eq!(alert.body, "Transaction button was clicked - review carefully");
}

#[tokio::test]
async fn tracked_rpc_body_is_flagged() {
    let (window, _, _) = wallet_page();
    spawn_relay_stub(window.clone(), vec![RECIPIENT.to_string()]);
    let page = install(&window, PageServices::default());
    page.refresh_watch_list().await;
    let mut events = window.document().subscribe_events();

    let body = json!({
        "jsonrpc": "2.0", "id": 7, "method": "eth_sendTransaction",
        "params": [{ "from": ACCOUNT, "to": RECIPIENT, "value": "0x1" }]
    });
    window.dispatch_event(PageEvent::Fetch {
        url: "https://mainnet.infura.io/v3/key".into(),
        body: Some(body.to_string()),
    });
    let alert = next_alert(&mut events, "TRACKED ADDRESS RPC TRANSACTION").await;
    assert_eq!(
        alert.body,
        format!("TO tracked address via RPC: {}", RECIPIENT.to_ascii_lowercase())
    );
}

#[tokio::test]
async fn unload_tears_the_guard_down() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());
    window.dispatch_event(PageEvent::BeforeUnload);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !page.is_shut_down() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("teardown");
    assert!(page.registry().is_empty());
    assert!(window.exposed_toggle().is_none());
    page.shutdown(Duration::from_secs(1)).await;
}

/// Wallet that never answers.
struct StalledWallet;

#[async_trait::async_trait]
impl RequestDispatch for StalledWallet {
    async fn request(&self, _args: RequestArguments) -> Result<Value, ProviderError> {
        std::future::pending().await
    }

    fn signature(&self) -> String {
        "stalled-wallet".into()
    }
}

/// Wallet connected to a fixed chain.
struct ChainWallet(&'static str);

#[async_trait::async_trait]
impl RequestDispatch for ChainWallet {
    async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        match args.method.as_str() {
            "eth_chainId" => Ok(json!(self.0)),
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    fn signature(&self) -> String {
        format!("chain-wallet({})", self.0)
    }
}

fn install_with(window: &Arc<Window>, config: PageConfig) -> Arc<PageContext> {
    PageContext::install(
        window.clone(),
        config,
        &VerificationConfig::default(),
        PageServices::default(),
    )
    .expect("first install")
}

#[tokio::test]
async fn chain_id_comes_from_the_page_wallet() {
    let window = Window::new("https://dapp.example");
    window.set_global("ethereum", ProviderObject::new(Arc::new(ChainWallet("0xaa36a7"))));
    let _page = install(&window, PageServices::default());

    let chain = WindowChainId::new(Arc::downgrade(&window));
    let chain_id = chain.chain_id().await;
    assert_eq!(chain_id, Some(11_155_111));
    assert_eq!(chain_id.map(Network::from_chain_id), Some(Network::Sepolia));
}

#[tokio::test]
async fn chain_id_is_none_without_a_wallet_or_window() {
    let window = Window::new("https://dapp.example");
    let chain = WindowChainId::new(Arc::downgrade(&window));
    assert_eq!(chain.chain_id().await, None);

    window.set_global("ethereum", ProviderObject::new(Arc::new(ChainWallet("not-hex"))));
    assert_eq!(chain.chain_id().await, None);

    drop(window);
    assert_eq!(chain.chain_id().await, None);
}

#[tokio::test(start_paused = true)]
async fn stalled_wallet_chain_id_times_out() {
    let window = Window::new("https://dapp.example");
    window.set_global("ethereum", ProviderObject::new(Arc::new(StalledWallet)));
    let chain = WindowChainId::new(Arc::downgrade(&window)).with_timeout(Duration::from_millis(250));

    let started = tokio::time::Instant::now();
    assert_eq!(chain.chain_id().await, None);
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn late_provider_hooked_by_timer() {
    let (window, _, _) = wallet_page();
    let page = install(&window, PageServices::default());

    let late = ProviderObject::new(Arc::new(MockWallet::default()));
    window.set_global("wallet", late.clone());
    assert!(!page.registry().is_hooked(&late));

    // One rescan period (500ms) plus slack; no mutation is posted.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(page.registry().is_hooked(&late));
    assert_eq!(
        late.dispatch().unwrap().signature(),
        "aegis::intercept(mock-wallet)"
    );
}

#[tokio::test(start_paused = true)]
async fn mutation_burst_triggers_single_rescan() {
    let (window, _, _) = wallet_page();
    // Periodic timer far away so only the mutation trigger can rescan.
    let page = install_with(
        &window,
        PageConfig {
            rescan_interval_ms: 60_000,
            ..PageConfig::default()
        },
    );

    let late = ProviderObject::new(Arc::new(MockWallet::default()));
    window.set_global("provider", late.clone());
    for _ in 0..3 {
        window.document().append(vec![Arc::new(Element::new("div"))]);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    // Each mutation pushed the debounce deadline back.
    assert!(!page.registry().is_hooked(&late));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(page.registry().is_hooked(&late));

    // Quiet document: no second rescan follows the burst.
    let later = ProviderObject::new(Arc::new(MockWallet::default()));
    window.set_global("metamask", later.clone());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!page.registry().is_hooked(&later));
}
