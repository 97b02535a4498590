//! Runtime port between the content relay and the privileged background.
//!
//! Relay → background traffic is a stream of [`RuntimeEnvelope`]s, each
//! optionally carrying a one-shot reply sender. Background → relay traffic is
//! a stream of [`PrivilegedCommand`]s. Neither direction guarantees delivery:
//! a request whose reply does not arrive within the port timeout resolves to
//! the default reply.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::address::TrackedAddress;
use crate::messages::AlertPriority;

/// Default deadline for a round trip over the runtime port.
pub const DEFAULT_ROUND_TRIP_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeMessage {
    Notify {
        title: String,
        body: String,
        priority: AlertPriority,
    },
    AddAddress {
        address: TrackedAddress,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeReply {
    pub ok: bool,
}

#[derive(Debug)]
pub struct RuntimeEnvelope {
    pub message: RuntimeMessage,
    pub reply: Option<oneshot::Sender<RuntimeReply>>,
}

/// Commands the background pushes down to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivilegedCommand {
    ToggleUi,
    WatchListChanged(Vec<TrackedAddress>),
}

/// Relay-side handle onto the background.
#[derive(Debug, Clone)]
pub struct RuntimePort {
    sender: mpsc::UnboundedSender<RuntimeEnvelope>,
    timeout: Duration,
}

impl RuntimePort {
    pub fn new(sender: mpsc::UnboundedSender<RuntimeEnvelope>) -> Self {
        Self::with_timeout(sender, DEFAULT_ROUND_TRIP_TIMEOUT)
    }

    pub fn with_timeout(sender: mpsc::UnboundedSender<RuntimeEnvelope>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    /// Fire-and-forget send. Returns `false` if the background is gone.
    pub fn send(&self, message: RuntimeMessage) -> bool {
        self.sender
            .send(RuntimeEnvelope {
                message,
                reply: None,
            })
            .is_ok()
    }

    /// Sends and waits for the reply; any failure or timeout yields the default reply.
    pub async fn request(&self, message: RuntimeMessage) -> RuntimeReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = RuntimeEnvelope {
            message,
            reply: Some(reply_tx),
        };
        if self.sender.send(envelope).is_err() {
            debug!("runtime port closed, dropping request");
            return RuntimeReply::default();
        }
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => RuntimeReply::default(),
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "runtime round trip timed out");
                RuntimeReply::default()
            }
        }
    }
}

/// Creates the relay → background channel pair.
pub fn runtime_channel() -> (RuntimePort, mpsc::UnboundedReceiver<RuntimeEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RuntimePort::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn request_times_out_to_default() {
        let (port, mut rx) = runtime_channel();
        // Hold the envelope without replying.
        let holder = tokio::spawn(async move {
            let envelope = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(envelope);
        });
        let reply = port
            .request(RuntimeMessage::Notify {
                title: "t".into(),
                body: "b".into(),
                priority: AlertPriority::Low,
            })
            .await;
        assert_eq!(reply, RuntimeReply { ok: false });
        drop(holder);
    }

    #[tokio::test]
    async fn request_returns_reply() {
        let (port, mut rx) = runtime_channel();
        tokio::spawn(async move {
            if let Some(envelope) = rx.recv().await
                && let Some(reply) = envelope.reply
            {
                let _ = reply.send(RuntimeReply { ok: true });
            }
        });
        let address: TrackedAddress = format!("0x{}aa", "0".repeat(38)).parse().unwrap();
        let reply = port.request(RuntimeMessage::AddAddress { address }).await;
        assert!(reply.ok);
    }

    #[tokio::test]
    async fn closed_port_yields_default() {
        let (port, rx) = runtime_channel();
        drop(rx);
        assert!(!port.send(RuntimeMessage::Notify {
            title: "t".into(),
            body: "b".into(),
            priority: AlertPriority::Low,
        }));
    }
}
