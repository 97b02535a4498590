//! Rescan scheduler: a fixed-period discovery timer plus a debounced
//! document-mutation trigger.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::context::PageContext;
use crate::window::{Element, Mutation};

/// Attribute set on buttons that already carry a click observer.
pub const OBSERVED_MARKER: &str = "data-aegis-observed";

const BUTTON_KEYWORDS: &[&str] = &["transact", "send", "transfer", "run", "execute", "deploy"];

/// A `<button>` whose class or id mentions a transaction-ish verb.
pub fn is_transaction_button(element: &Element) -> bool {
    if element.tag() != "button" {
        return false;
    }
    ["class", "id"]
        .iter()
        .filter_map(|name| element.attribute(name))
        .map(|value| value.to_ascii_lowercase())
        .any(|value| BUTTON_KEYWORDS.iter().any(|keyword| value.contains(keyword)))
}

pub(crate) async fn run(page: Arc<PageContext>, mut mutations: broadcast::Receiver<Mutation>) {
    let config = page.config().clone();
    let shutdown = page.shutdown_token().clone();

    let mut ticker = tokio::time::interval(config.rescan_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Install already swept once.
    ticker.tick().await;

    let debounce = tokio::time::sleep(config.mutation_debounce());
    tokio::pin!(debounce);
    let mut debounce_armed = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                page.rescan();
            }
            mutation = mutations.recv() => {
                match mutation {
                    Ok(mutation) => {
                        if config.observe_buttons {
                            page.observe_buttons(&mutation.added);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "mutation observer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
                debounce.as_mut().reset(Instant::now() + config.mutation_debounce());
                debounce_armed = true;
            }
            _ = &mut debounce, if debounce_armed => {
                debounce_armed = false;
                page.rescan();
            }
        }
    }
    debug!("rescan scheduler stopped");
}
