//! Page-context configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::RECENT_ACTIVITY_LIMIT;

/// Page guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Period of the discovery rescan timer (default: 500 ms).
    pub rescan_interval_ms: u64,
    /// Quiet period after the last document mutation before rescanning (default: 100 ms).
    pub mutation_debounce_ms: u64,
    /// Deadline for watch-list round trips through the relay (default: 1000 ms).
    pub relay_timeout_ms: u64,
    /// Maximum entries kept in the recent-activity list (default: 10).
    pub activity_limit: usize,
    /// Attach click observers to transaction-looking buttons (default: true).
    pub observe_buttons: bool,
    /// Inspect JSON-RPC bodies of outgoing page fetches (default: true).
    pub monitor_rpc_bodies: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: 500,
            mutation_debounce_ms: 100,
            relay_timeout_ms: 1000,
            activity_limit: RECENT_ACTIVITY_LIMIT,
            observe_buttons: true,
            monitor_rpc_bodies: true,
        }
    }
}

impl PageConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms.max(1))
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

/// Contract verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Look up contract targets at all (default: true).
    pub enabled: bool,
    /// Explorer API key (None = anonymous requests).
    pub api_key: Option<String>,
    /// Override for the explorer endpoint of every network (None = per-network default).
    pub api_url: Option<String>,
    /// How long a verification record stays fresh (default: 300 s).
    pub freshness_secs: u64,
    /// How long a risk assessment stays fresh (default: 7200 s).
    pub risk_freshness_secs: u64,
    /// Per-request HTTP timeout (default: 10 s).
    pub request_timeout_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_url: None,
            freshness_secs: 300,
            risk_freshness_secs: 2 * 60 * 60,
            request_timeout_secs: 10,
        }
    }
}

impl VerificationConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn risk_freshness(&self) -> Duration {
        Duration::from_secs(self.risk_freshness_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let page = PageConfig::default();
        assert_eq!(page.rescan_interval(), Duration::from_millis(500));
        assert_eq!(page.mutation_debounce(), Duration::from_millis(100));
        assert_eq!(page.relay_timeout(), Duration::from_secs(1));
        let verification = VerificationConfig::default();
        assert_eq!(verification.freshness(), Duration::from_secs(300));
        assert_eq!(verification.risk_freshness(), Duration::from_secs(7200));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let page: PageConfig = serde_json::from_str(r#"{ "rescan_interval_ms": 250 }"#).unwrap();
        assert_eq!(page.rescan_interval_ms, 250);
        assert_eq!(page.mutation_debounce_ms, 100);
    }
}
