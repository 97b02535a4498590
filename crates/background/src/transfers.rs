//! ERC-20 transfer watcher.
//!
//! Polls `eth_blockNumber` and `eth_getLogs` for `Transfer` events whose
//! recipient is on the watch-list and raises a "Token Received" notification
//! per log. The watch-list is re-read from the store on every poll, so
//! additions take effect without restarting the watcher. Watching starts at
//! the head observed by the first poll; history is never backfilled.

use std::sync::Arc;
use std::time::Duration;

use aegis_common::{AlertPriority, TrackedAddress, WatchListStore};
use ethereum_types::{Address, U256};
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::RpcError;
use crate::notifier::{Notification, Notifier};
use crate::rpc::{EthRpcClient, RpcConfig};

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const TOKEN_RECEIVED_TITLE: &str = "Token Received";

const TOKEN_DECIMALS: usize = 18;

/// One decoded ERC-20 `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token: Option<TrackedAddress>,
    pub from: TrackedAddress,
    pub to: TrackedAddress,
    pub value: U256,
}

impl TokenTransfer {
    /// Decodes a log object. ERC-721 transfers (tokenId as a fourth topic)
    /// are rejected.
    pub fn from_log(log: &Value) -> Result<Self, RpcError> {
        let topics = log
            .get("topics")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::parse("eth_getLogs", "topics", "missing"))?;
        let [signature, from, to] = topics.as_slice() else {
            return Err(RpcError::parse(
                "eth_getLogs",
                "topics",
                format!("expected 3 topics, got {}", topics.len()),
            ));
        };
        if !signature
            .as_str()
            .is_some_and(|topic| topic.eq_ignore_ascii_case(TRANSFER_TOPIC))
        {
            return Err(RpcError::parse("eth_getLogs", "topics[0]", "not a Transfer event"));
        }

        let data = log
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::parse("eth_getLogs", "data", "missing"))?;
        let data = decode_hex("data", data)?;
        if data.is_empty() || data.len() > 32 {
            return Err(RpcError::parse(
                "eth_getLogs",
                "data",
                format!("expected a 32-byte word, got {} bytes", data.len()),
            ));
        }

        Ok(Self {
            token: log
                .get("address")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse().ok()),
            from: topic_address("topics[1]", from)?,
            to: topic_address("topics[2]", to)?,
            value: U256::from_big_endian(&data),
        })
    }

    /// `~1.5 tokens from 0xabcd…1234`.
    pub fn notification_body(&self) -> String {
        format!(
            "~{} tokens from {}",
            format_units(self.value, TOKEN_DECIMALS),
            self.from.short()
        )
    }
}

/// Renders `value` scaled down by `10^decimals`, without trailing zeros.
pub fn format_units(value: U256, decimals: usize) -> String {
    let unit = U256::exp10(decimals);
    let whole = value / unit;
    let fraction = value % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals);
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Left-pads an address to a 32-byte topic.
pub fn address_topic(address: &TrackedAddress) -> String {
    format!("0x{:0>64}", hex::encode(address.as_address().as_bytes()))
}

fn topic_address(field: &str, topic: &Value) -> Result<TrackedAddress, RpcError> {
    let raw = topic
        .as_str()
        .ok_or_else(|| RpcError::parse("eth_getLogs", field, "expected hex string"))?;
    let bytes = decode_hex(field, raw)?;
    if bytes.len() != 32 {
        return Err(RpcError::parse(
            "eth_getLogs",
            field,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(TrackedAddress::from(Address::from_slice(&bytes[12..])))
}

fn decode_hex(field: &str, raw: &str) -> Result<Vec<u8>, RpcError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| RpcError::parse("eth_getLogs", field, e.to_string()))
}

pub struct TransferWatcher {
    client: EthRpcClient,
    store: Arc<dyn WatchListStore>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    max_block_range: u64,
    /// Next block to scan; `None` until the first poll sees the head.
    cursor: Option<u64>,
}

impl TransferWatcher {
    pub fn new(client: EthRpcClient, store: Arc<dyn WatchListStore>, notifier: Arc<dyn Notifier>) -> Self {
        let defaults = TransferConfig::default();
        Self {
            client,
            store,
            notifier,
            poll_interval: defaults.poll_interval(),
            max_block_range: defaults.max_block_range,
            cursor: None,
        }
    }

    /// Builds the watcher described by `config`, or `None` if no endpoint is set.
    pub fn from_config(
        config: &TransferConfig,
        store: Arc<dyn WatchListStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Option<Self> {
        let url = config.rpc_url.as_deref()?;
        let client = EthRpcClient::with_config(
            url,
            RpcConfig {
                timeout: config.request_timeout(),
                max_retries: config.max_retries,
                ..RpcConfig::default()
            },
        );
        let mut watcher = Self::new(client, store, notifier);
        watcher.poll_interval = config.poll_interval();
        watcher.max_block_range = config.max_block_range.max(1);
        Some(watcher)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Starts scanning at `block` instead of at the first observed head.
    pub fn starting_at(mut self, block: u64) -> Self {
        self.cursor = Some(block);
        self
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Scans the blocks produced since the previous poll. Returns the number
    /// of notifications raised. On error the cursor stays put and the same
    /// range is retried next time.
    pub async fn poll_once(&mut self) -> Result<usize, RpcError> {
        let head = self.client.block_number().await?;
        let Some(from) = self.cursor else {
            debug!(head, "transfer watcher anchored at head");
            self.cursor = Some(head + 1);
            return Ok(0);
        };
        if from > head {
            return Ok(0);
        }
        let to = head.min(from + self.max_block_range - 1);

        let watched: FxHashSet<TrackedAddress> = match self.store.get().await {
            Ok(addresses) => addresses.into_iter().collect(),
            Err(err) => {
                warn!(%err, "could not read watch-list, skipping poll");
                return Ok(0);
            }
        };
        if watched.is_empty() {
            self.cursor = Some(to + 1);
            return Ok(0);
        }

        let recipients: Vec<String> = watched.iter().map(address_topic).collect();
        let topics = json!([TRANSFER_TOPIC, Value::Null, recipients]);
        let logs = self.client.get_logs(from, to, topics).await?;

        let mut raised = 0;
        for log in &logs {
            let transfer = match TokenTransfer::from_log(log) {
                Ok(transfer) => transfer,
                Err(err) => {
                    debug!(%err, "skipping undecodable transfer log");
                    continue;
                }
            };
            if !watched.contains(&transfer.to) {
                continue;
            }
            info!(to = %transfer.to, from = %transfer.from, value = %transfer.value, "token received");
            let notification = Notification::new(
                TOKEN_RECEIVED_TITLE,
                transfer.notification_body(),
                AlertPriority::High,
            );
            match self.notifier.create(&notification).await {
                Ok(()) => raised += 1,
                Err(err) => warn!(%err, "token notification failed"),
            }
        }
        self.cursor = Some(to + 1);
        Ok(raised)
    }

    /// Polls until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            url = self.client.url(),
            poll_secs = self.poll_interval.as_secs(),
            "transfer watcher started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        warn!(%err, "transfer poll failed");
                    }
                }
            }
        }
        debug!("transfer watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u128) -> String {
        format!("0x{value:064x}")
    }

    fn address(last: u8) -> TrackedAddress {
        format!("0x{}{last:02x}", "0".repeat(38)).parse().unwrap()
    }

    #[test]
    fn units_drop_trailing_zeros() {
        let ether = U256::exp10(18);
        assert_eq!(format_units(ether, 18), "1");
        assert_eq!(format_units(ether * U256::from(3u8) / U256::from(2u8), 18), "1.5");
        assert_eq!(format_units(U256::from(1u8), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::zero(), 18), "0");
        assert_eq!(format_units(U256::from(12_345u64), 2), "123.45");
    }

    #[test]
    fn topic_is_left_padded() {
        let topic = address_topic(&address(0xab));
        assert_eq!(topic.len(), 66);
        assert!(topic.ends_with("00000000000000000000000000000000000000ab"));
        assert!(topic.starts_with("0x000000000000000000000000"));
    }

    #[test]
    fn erc20_log_decodes() {
        let log = json!({
            "address": format!("0x{}", "11".repeat(20)),
            "topics": [TRANSFER_TOPIC, address_topic(&address(0xcd)), address_topic(&address(0xab))],
            "data": word(2_500_000_000_000_000_000),
        });
        let transfer = TokenTransfer::from_log(&log).unwrap();
        assert_eq!(transfer.from, address(0xcd));
        assert_eq!(transfer.to, address(0xab));
        assert_eq!(transfer.notification_body(), "~2.5 tokens from 0x0000…00cd");
        assert!(transfer.token.is_some());
    }

    #[test]
    fn erc721_and_foreign_logs_are_rejected() {
        let nft = json!({
            "topics": [TRANSFER_TOPIC, address_topic(&address(1)), address_topic(&address(2)), word(7)],
            "data": "0x",
        });
        assert!(TokenTransfer::from_log(&nft).is_err());

        let approval = json!({
            "topics": [word(1), address_topic(&address(1)), address_topic(&address(2))],
            "data": word(1),
        });
        assert!(TokenTransfer::from_log(&approval).is_err());
    }
}
