use std::sync::Arc;

use aegis::config::AegisConfig;
use aegis::session::{Script, ScriptedRequest, SessionParts, SessionReport, replay, scripted_window};
use aegis_background::{JsonFileWatchList, MemoryNotifier};
use aegis_common::{MemoryWatchList, TrackedAddress, WatchListStore};
use serde_json::json;

const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";
const RECIPIENT: &str = "0x00000000000000000000000000000000000000bb";

fn account() -> TrackedAddress {
    ACCOUNT.parse().unwrap()
}

fn transfer_from(from: &str) -> ScriptedRequest {
    ScriptedRequest {
        method: "eth_sendTransaction".into(),
        params: Some(json!([{ "from": from, "to": RECIPIENT, "value": "0xde0b6b3a7640000" }])),
    }
}

fn script(requests: Vec<ScriptedRequest>) -> Script {
    Script {
        origin: "https://dapp.test".into(),
        chain_id: 1,
        accounts: vec![ACCOUNT.into()],
        requests,
    }
}

async fn run(script: Script, parts: SessionParts) -> eyre::Result<SessionReport> {
    replay(scripted_window(&script), &script, &AegisConfig::default(), parts).await
}

#[tokio::test]
async fn tracked_transfer_notifies_once() {
    let store = Arc::new(MemoryWatchList::with_addresses([account()]));
    let notifier = Arc::new(MemoryNotifier::new());
    let parts = SessionParts {
        store,
        notifier: notifier.clone(),
        lookup: None,
    };

    let report = run(script(vec![transfer_from(ACCOUNT)]), parts)
        .await
        .unwrap();

    assert!(report.results[0].is_ok());
    assert_eq!(report.watch_list, vec![account()]);
    assert_eq!(report.activity.len(), 1);
    assert_eq!(report.alerts_forwarded, 1);

    let notifications = notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "TRACKED ADDRESS TRANSACTION");
}

#[tokio::test]
async fn untracked_transfer_is_only_recorded() {
    let notifier = Arc::new(MemoryNotifier::new());
    let parts = SessionParts {
        store: Arc::new(MemoryWatchList::new()),
        notifier: notifier.clone(),
        lookup: None,
    };

    let report = run(script(vec![transfer_from(RECIPIENT)]), parts)
        .await
        .unwrap();

    assert_eq!(report.activity.len(), 1);
    assert!(notifier.notifications().is_empty());
}

#[tokio::test]
async fn connected_account_is_persisted_and_mirrored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlist.json");
    let store = Arc::new(JsonFileWatchList::open(&path).await.unwrap());
    let notifier = Arc::new(MemoryNotifier::new());
    let parts = SessionParts {
        store: store.clone(),
        notifier: notifier.clone(),
        lookup: None,
    };
    let requests = vec![
        ScriptedRequest {
            method: "eth_requestAccounts".into(),
            params: None,
        },
        transfer_from(ACCOUNT),
    ];

    let report = run(script(requests), parts).await.unwrap();

    assert_eq!(report.results[0].as_ref().unwrap(), &json!([ACCOUNT]));
    assert_eq!(report.watch_list, vec![account()]);
    assert_eq!(store.get().await.unwrap(), vec![account()]);

    let reopened = JsonFileWatchList::open(&path).await.unwrap();
    assert_eq!(reopened.get().await.unwrap(), vec![account()]);

    let titles: Vec<String> = notifier.notifications().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["Aegis", "TRACKED ADDRESS TRANSACTION"]);
    assert_eq!(notifier.notifications()[0].body, format!("Monitoring {ACCOUNT}"));
}

#[tokio::test]
async fn unsupported_methods_are_answered_with_an_error() {
    let parts = SessionParts {
        store: Arc::new(MemoryWatchList::new()),
        notifier: Arc::new(MemoryNotifier::new()),
        lookup: None,
    };
    let requests = vec![ScriptedRequest {
        method: "wallet_switchEthereumChain".into(),
        params: None,
    }];

    let report = run(script(requests), parts).await.unwrap();

    assert_eq!(report.results[0].as_ref().unwrap_err().code, 4200);
}
