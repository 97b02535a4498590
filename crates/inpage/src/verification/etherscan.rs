//! Etherscan-style `getsourcecode` adapter.

use std::sync::Weak;
use std::time::Duration;

use aegis_common::{RequestArguments, TrackedAddress};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::record::{Network, VerificationRecord, parse_chain_id_hex};
use super::{ChainIdSource, ContractLookup};
use crate::error::LookupError;
use crate::window::Window;

/// Minimum source length accepted as a real verification.
const MIN_SOURCE_LEN: usize = 10;

#[derive(Debug, Deserialize)]
struct SourceCodeResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SourceCodeEntry {
    source_code: String,
    contract_name: String,
    compiler_version: String,
    #[serde(rename = "ABI")]
    abi: String,
}

/// Whether an explorer `SourceCode` field represents verified source.
pub fn source_is_verified(source: &str) -> bool {
    if source.trim_start().starts_with('{')
        && let Ok(parsed) = serde_json::from_str::<Value>(source)
        && parsed
            .get("sources")
            .and_then(Value::as_object)
            .is_some_and(|sources| !sources.is_empty())
    {
        return true;
    }
    source.chars().count() > MIN_SOURCE_LEN
}

pub struct EtherscanLookup {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoints: FxHashMap<Network, String>,
    chain: Box<dyn ChainIdSource>,
}

impl EtherscanLookup {
    pub fn new(api_key: Option<String>, timeout: Duration, chain: Box<dyn ChainIdSource>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            endpoints: FxHashMap::default(),
            chain,
        }
    }

    /// Overrides the explorer endpoint for one network.
    pub fn with_endpoint(mut self, network: Network, url: impl Into<String>) -> Self {
        self.endpoints.insert(network, url.into());
        self
    }

    fn endpoint(&self, network: Network) -> &str {
        self.endpoints
            .get(&network)
            .map(String::as_str)
            .unwrap_or_else(|| network.default_api_url())
    }

    fn record_from(address: TrackedAddress, network: Network, entry: SourceCodeEntry) -> VerificationRecord {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);
        VerificationRecord {
            address,
            is_verified: source_is_verified(&entry.source_code),
            name: non_empty(entry.contract_name),
            compiler_version: non_empty(entry.compiler_version),
            source_code: non_empty(entry.source_code),
            abi: non_empty(entry.abi),
            network,
            fetched_at: Instant::now(),
        }
    }
}

#[async_trait::async_trait]
impl ContractLookup for EtherscanLookup {
    async fn lookup(&self, address: TrackedAddress) -> Result<VerificationRecord, LookupError> {
        let network = self
            .chain
            .chain_id()
            .await
            .map(Network::from_chain_id)
            .unwrap_or(Network::Mainnet);
        let address_param = address.to_string();
        let mut query = vec![
            ("module", "contract"),
            ("action", "getsourcecode"),
            ("address", address_param.as_str()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        debug!(%address, %network, "querying contract explorer");
        let response = self
            .client
            .get(self.endpoint(network))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }
        let body: SourceCodeResponse = response.json().await?;

        let entry = match body.result {
            Value::Array(mut entries) if body.status == "1" && !entries.is_empty() => {
                serde_json::from_value::<SourceCodeEntry>(entries.swap_remove(0))
                    .map_err(|err| LookupError::Parse(err.to_string()))?
            }
            // Explorer answered but knows nothing: a negative result for this network.
            _ => return Ok(VerificationRecord::unverified(address, network)),
        };
        Ok(Self::record_from(address, network, entry))
    }
}

/// How long the page's wallet gets to answer `eth_chainId`.
pub const CHAIN_ID_TIMEOUT: Duration = Duration::from_secs(1);

/// Reads the chain id from the page's primary provider (`window.ethereum`).
pub struct WindowChainId {
    window: Weak<Window>,
    timeout: Duration,
}

impl WindowChainId {
    pub fn new(window: Weak<Window>) -> Self {
        Self {
            window,
            timeout: CHAIN_ID_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl ChainIdSource for WindowChainId {
    async fn chain_id(&self) -> Option<u64> {
        let provider = self.window.upgrade()?.global("ethereum")?;
        let request = provider.request(RequestArguments::new("eth_chainId", None));
        let raw = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                debug!(%err, "wallet rejected eth_chainId");
                return None;
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "eth_chainId timed out");
                return None;
            }
        };
        parse_chain_id_hex(raw.as_str()?)
    }
}

/// Fixed chain id, for sessions without a page.
pub struct FixedChainId(pub Option<u64>);

#[async_trait::async_trait]
impl ChainIdSource for FixedChainId {
    async fn chain_id(&self) -> Option<u64> {
        self.0
    }
}
