use std::fmt;

use aegis_common::TrackedAddress;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Numeric value of an `eth_chainId` result such as `"0xaa36a7"`.
pub fn parse_chain_id_hex(raw: &str) -> Option<u64> {
    let digits = raw.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16).ok()
}

/// Chain the page's wallet is connected to, as far as explorer lookups care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Sepolia,
    Goerli,
    Polygon,
    Bsc,
    /// The lookup failed before a network could be determined.
    Unknown,
}

impl Network {
    /// Unsupported chains fall back to mainnet.
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 => Self::Mainnet,
            11_155_111 => Self::Sepolia,
            5 => Self::Goerli,
            137 => Self::Polygon,
            56 => Self::Bsc,
            _ => Self::Mainnet,
        }
    }

    /// Parses an `eth_chainId` result (`"0x1"`); anything unreadable is mainnet.
    pub fn from_chain_id_hex(raw: &str) -> Self {
        parse_chain_id_hex(raw)
            .map(Self::from_chain_id)
            .unwrap_or(Self::Mainnet)
    }

    pub fn default_api_url(self) -> &'static str {
        match self {
            Self::Mainnet | Self::Unknown => "https://api.etherscan.io/api",
            Self::Sepolia => "https://api-sepolia.etherscan.io/api",
            Self::Goerli => "https://api-goerli.etherscan.io/api",
            Self::Polygon => "https://api.polygonscan.com/api",
            Self::Bsc => "https://api.bscscan.com/api",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Sepolia => "sepolia",
            Self::Goerli => "goerli",
            Self::Polygon => "polygon",
            Self::Bsc => "bsc",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one contract verification lookup. Negative results are records
/// too.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub address: TrackedAddress,
    pub is_verified: bool,
    pub name: Option<String>,
    pub compiler_version: Option<String>,
    #[serde(skip)]
    pub source_code: Option<String>,
    #[serde(skip)]
    pub abi: Option<String>,
    pub network: Network,
    #[serde(skip)]
    pub fetched_at: Instant,
}

impl VerificationRecord {
    pub fn unverified(address: TrackedAddress, network: Network) -> Self {
        Self {
            address,
            is_verified: false,
            name: None,
            compiler_version: None,
            source_code: None,
            abi: None,
            network,
            fetched_at: Instant::now(),
        }
    }

    /// Source text, only when the contract is verified and has some.
    pub fn verified_source(&self) -> Option<&str> {
        self.source_code
            .as_deref()
            .filter(|source| self.is_verified && !source.is_empty())
    }

    pub fn status_line(&self) -> String {
        match (self.is_verified, &self.name) {
            (true, Some(name)) => format!("Verified ({name}) on {}", self.network),
            (true, None) => format!("Verified on {}", self.network),
            (false, _) => format!("UNVERIFIED on {}", self.network),
        }
    }
}
