//! Watch-list address type.
//!
//! A `TrackedAddress` is always rendered as `0x` followed by 40 lower-case hex
//! digits. Parsing is strict (exactly 42 characters, hex-prefixed), so any
//! value that made it into a watch-list compares byte-for-byte with any other
//! spelling of the same account.

use std::fmt;
use std::str::FromStr;

use ethereum_types::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a hex-prefixed 20-byte address.
pub const ADDRESS_STR_LEN: usize = 42;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must be {ADDRESS_STR_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("address must start with 0x")]
    MissingPrefix,

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedAddress(Address);

impl TrackedAddress {
    /// Validates user-supplied input. Surrounding whitespace is ignored, casing is not significant.
    pub fn parse_input(input: &str) -> Result<Self, AddressError> {
        input.trim().parse()
    }

    pub fn as_address(&self) -> Address {
        self.0
    }

    /// `0xabcd…1234` form used in notification bodies.
    pub fn short(&self) -> String {
        short_address(&self.to_string())
    }
}

impl From<Address> for TrackedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for TrackedAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDRESS_STR_LEN {
            return Err(AddressError::InvalidLength(s.len()));
        }
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        let bytes = hex::decode(digits).map_err(|_| AddressError::InvalidHex(s.to_string()))?;
        Ok(Self(Address::from_slice(&bytes)))
    }
}

impl fmt::Display for TrackedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl Serialize for TrackedAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TrackedAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Shortens any address-like string to `0xabcd…1234`. Strings too short to
/// abbreviate are returned as-is.
pub fn short_address(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 10 {
        return raw.to_string();
    }
    let head: String = chars.iter().take(6).collect();
    let tail: String = chars.iter().skip(chars.len() - 4).collect();
    format!("{head}…{tail}")
}
