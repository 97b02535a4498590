//! Contract verification and risk assessment.

pub mod cache;
pub mod etherscan;
pub mod record;
pub mod risk;

use aegis_common::TrackedAddress;

use crate::error::LookupError;

pub use cache::{CacheStatus, DEFAULT_VERIFICATION_FRESHNESS, VerificationCache};
pub use etherscan::{EtherscanLookup, FixedChainId, WindowChainId};
pub use record::{Network, VerificationRecord, parse_chain_id_hex};
pub use risk::{PatternRiskScorer, RiskAssessment, RiskCache, RiskLevel, RiskScorer};

/// External contract verification service.
#[async_trait::async_trait]
pub trait ContractLookup: Send + Sync {
    async fn lookup(&self, address: TrackedAddress) -> Result<VerificationRecord, LookupError>;
}

/// Source of the chain id used to pick an explorer.
#[async_trait::async_trait]
pub trait ChainIdSource: Send + Sync {
    async fn chain_id(&self) -> Option<u64>;
}
