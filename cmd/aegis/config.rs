//! TOML configuration for the `aegis` binary.
//!
//! Every section is optional and falls back to its defaults.
//!
//! ```toml
//! [page]
//! rescan_interval_ms = 500
//!
//! [verification]
//! api_key = "..."
//! freshness_secs = 300
//!
//! [background]
//! store_path = "watchlist.json"
//!
//! [background.notifications]
//! jsonl_path = "notifications.jsonl"
//!
//! [background.transfers]
//! rpc_url = "https://sepolia.example/rpc"
//! ```

use std::path::{Path, PathBuf};

use aegis_background::BackgroundConfig;
use aegis_inpage::{PageConfig, VerificationConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    pub page: PageConfig,
    pub verification: VerificationConfig,
    pub background: BackgroundConfig,
}

impl AegisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page.activity_limit == 0 {
            return Err(ConfigError::Invalid("page.activity_limit must be > 0".into()));
        }
        if self.page.relay_timeout_ms == 0 {
            return Err(ConfigError::Invalid("page.relay_timeout_ms must be > 0".into()));
        }
        if self.verification.freshness_secs == 0 {
            return Err(ConfigError::Invalid("verification.freshness_secs must be > 0".into()));
        }
        if self.background.transfers.max_block_range == 0 {
            return Err(ConfigError::Invalid(
                "background.transfers.max_block_range must be > 0".into(),
            ));
        }
        if let Some(url) = &self.background.notifications.webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "background.notifications.webhook_url must be an http(s) URL, got {url}"
            )));
        }
        Ok(())
    }
}
