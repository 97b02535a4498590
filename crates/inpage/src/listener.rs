//! Page-side listener for relay traffic and window events.

use std::sync::Arc;

use aegis_common::{AlertPacket, PacketBody, TargetTag};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::context::PageContext;
use crate::window::PageEvent;

pub(crate) async fn run(
    page: Arc<PageContext>,
    mut messages: broadcast::Receiver<Value>,
    mut events: broadcast::Receiver<PageEvent>,
) {
    let shutdown = page.shutdown_token().clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = messages.recv() => match message {
                Ok(value) => {
                    if let Some(packet) = AlertPacket::from_wire(&value)
                        && packet.target == TargetTag::Page
                    {
                        handle_packet(&page, packet.body);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "page message listener lagged"),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(PageEvent::BeforeUnload) => {
                    page.teardown();
                    break;
                }
                Ok(event) => handle_event(&page, event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "page event listener lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("page listener stopped");
}

fn handle_packet(page: &PageContext, body: PacketBody) {
    match body {
        PacketBody::AddressListResponse { addresses } => {
            page.replace_watch_list(&addresses);
        }
        PacketBody::ToggleUi => {
            page.toggle_ui();
        }
        other => debug!(packet = other.type_name(), "ignoring packet addressed to page"),
    }
}

fn handle_event(page: &PageContext, event: PageEvent) {
    match event {
        PageEvent::AnnounceProvider(provider) => {
            let report = page.hook_announced(&provider);
            if !report.hooked.is_empty() {
                info!(hooked = ?report.hooked, "announced provider hooked");
            }
        }
        PageEvent::Custom { name, .. } => match name.as_str() {
            "remix:transaction" => {
                page.page_signal("Remix Transaction", "Transaction detected in Remix IDE");
            }
            "web3:transaction" => {
                page.page_signal("Web3 Transaction", "Transaction detected via Web3");
            }
            _ => {}
        },
        PageEvent::Fetch { url, body } => {
            if page.config().monitor_rpc_bodies
                && let Some(body) = body
            {
                page.inspect_rpc_body(&url, &body);
            }
        }
        PageEvent::BeforeUnload => page.teardown(),
    }
}
