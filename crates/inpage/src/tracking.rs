//! Watch-list matching for outgoing transactions.

use std::fmt;

use aegis_common::{AlertPayload, AlertPriority, TrackedAddress};
use serde_json::{Value, json};

pub const TRACKED_TITLE: &str = "TRACKED ADDRESS TRANSACTION";
pub const TRACKED_RPC_TITLE: &str = "TRACKED ADDRESS RPC TRANSACTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    From,
    To,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::From => "FROM",
            Self::To => "TO",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedMatch {
    pub direction: Direction,
    pub address: TrackedAddress,
}

impl TrackedMatch {
    /// Alert for a call intercepted at the provider.
    pub fn alert(&self, details: Value) -> AlertPayload {
        AlertPayload::new(
            TRACKED_TITLE,
            format!("{} tracked address: {}", self.direction, self.address),
            AlertPriority::High,
        )
        .with_details(self.with_match(details))
    }

    /// Alert for a transaction seen in a raw JSON-RPC request body.
    pub fn rpc_alert(&self, channel: &str, details: Value) -> AlertPayload {
        AlertPayload::new(
            TRACKED_RPC_TITLE,
            format!("{} tracked address via {channel}: {}", self.direction, self.address),
            AlertPriority::High,
        )
        .with_details(self.with_match(details))
    }

    fn with_match(&self, mut details: Value) -> Value {
        if let Value::Object(map) = &mut details {
            map.insert("direction".into(), json!(self.direction.to_string()));
            map.insert("trackedAddress".into(), json!(self.address.to_string()));
        }
        details
    }
}

/// Checks `from` then `to` against the watch-list.
///
/// `from` wins when both sides are tracked. Values that are not well-formed
/// addresses never match.
pub fn match_tracked<F>(from: Option<&str>, to: Option<&str>, is_tracked: F) -> Option<TrackedMatch>
where
    F: Fn(&TrackedAddress) -> bool,
{
    let lookup = |raw: Option<&str>, direction| {
        let address = raw.and_then(|r| r.parse::<TrackedAddress>().ok())?;
        is_tracked(&address).then_some(TrackedMatch { direction, address })
    };
    lookup(from, Direction::From).or_else(|| lookup(to, Direction::To))
}
