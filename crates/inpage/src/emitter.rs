//! Dual-channel alert emitter.
//!
//! Every packet leaves the page twice: as a window message and as a
//! same-document `AegisInpageEvent` custom event. Both copies carry the same
//! packet id so the relay can drop the second one.

use std::sync::Arc;

use aegis_common::messages::DOM_EVENT_NAME;
use aegis_common::{AlertPacket, AlertPayload, PacketBody, TargetTag};
use tracing::{debug, warn};

use crate::window::{DomEvent, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub message: bool,
    pub event: bool,
}

impl Delivery {
    pub fn any(self) -> bool {
        self.message || self.event
    }
}

pub struct AlertEmitter {
    window: Arc<Window>,
}

impl AlertEmitter {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn alert(&self, payload: AlertPayload) -> Delivery {
        debug!(title = %payload.title, priority = ?payload.priority, "emitting alert");
        self.emit(PacketBody::TransactionDetected(payload))
    }

    /// Sends `body` to the relay on both channels.
    pub fn emit(&self, body: PacketBody) -> Delivery {
        let packet = AlertPacket::new(TargetTag::Relay, body);
        let wire = packet.to_wire();
        let kind = packet.body.type_name();

        let message = match self.window.post_message(wire.clone()) {
            Ok(()) => true,
            Err(err) => {
                warn!(packet = kind, %err, "window message channel failed");
                false
            }
        };
        let event = DomEvent {
            name: DOM_EVENT_NAME.to_string(),
            detail: wire,
        };
        let event = match self.window.document().dispatch_event(event) {
            Ok(()) => true,
            Err(err) => {
                warn!(packet = kind, %err, "custom event channel failed");
                false
            }
        };
        Delivery { message, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::AlertPriority;

    #[tokio::test]
    async fn both_channels_carry_the_same_packet() {
        let window = Window::new("https://dapp.example");
        let mut messages = window.subscribe_messages();
        let mut events = window.document().subscribe_events();
        let emitter = AlertEmitter::new(window.clone());

        let delivery = emitter.alert(AlertPayload::new("t", "b", AlertPriority::Low));
        assert_eq!(
            delivery,
            Delivery {
                message: true,
                event: true
            }
        );

        let via_message = messages.recv().await.unwrap();
        let via_event = events.recv().await.unwrap();
        assert_eq!(via_event.name, DOM_EVENT_NAME);
        assert_eq!(via_message, via_event.detail);
        assert_eq!(via_message["target"], "AegisContent");
    }

    #[tokio::test]
    async fn one_blocked_channel_does_not_stop_the_other() {
        let window = Window::new("https://dapp.example");
        let mut events = window.document().subscribe_events();
        window.block_post_message(true);
        let emitter = AlertEmitter::new(window.clone());

        let delivery = emitter.emit(PacketBody::AddressListQuery);
        assert!(!delivery.message);
        assert!(delivery.event);
        assert!(delivery.any());
        assert_eq!(events.recv().await.unwrap().detail["type"], "Aegis/GetAddresses");
    }
}
