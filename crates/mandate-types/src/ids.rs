use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing an [`Address`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("address must be 40 hex characters, got {0}")]
    BadLength(usize),

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

/// A 20-byte account address.
///
/// Parses from `0x`-prefixed hex (case-insensitive) and renders lowercase.
/// Used for both the delegatee and the agent account.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a `0x`-prefixed hex address.
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .ok_or_else(|| AddressParseError::MissingPrefix(input.to_string()))?;

        if digits.len() != 40 {
            return Err(AddressParseError::BadLength(digits.len()));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| AddressParseError::InvalidHex(input.to_string()))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        Self::parse(&input)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Content identifier of a published ability artifact.
///
/// Grants in the permission registry are scoped to this content hash, not
/// to a mutable name, so the installed code and the on-chain grant are
/// verifiably the same artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbilityCid(pub String);

impl AbilityCid {
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AbilityCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content identifier of a published policy artifact.
///
/// Independent namespace from abilities.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyCid(pub String);

impl PolicyCid {
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-side application identity a grant is scoped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub u64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of the application the grant was made against. Policy parameters
/// are versioned per app version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppVersion(pub u32);

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user-controlled identity an ability acts on behalf of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAccount {
    pub address: Address,
    /// Uncompressed public key hex, for signing backends that need it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl AgentAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            public_key: None,
        }
    }

    pub fn with_public_key(address: Address, public_key: impl Into<String>) -> Self {
        Self {
            address,
            public_key: Some(public_key.into()),
        }
    }
}

/// Correlation identifier minted once per invocation.
///
/// Appears in the invocation report and every log line so a caller-facing
/// error can be matched to full diagnostics without leaking them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub uuid::Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_and_renders_lowercase() {
        let addr = Address::parse("0xAbCdEf0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(
            addr.to_string(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }

    #[test]
    fn address_rejects_missing_prefix() {
        let err = Address::parse("abcdef0123456789abcdef0123456789abcdef01").unwrap_err();
        assert!(matches!(err, AddressParseError::MissingPrefix(_)));
    }

    #[test]
    fn address_rejects_bad_length() {
        let err = Address::parse("0xabcd").unwrap_err();
        assert_eq!(err, AddressParseError::BadLength(4));
    }

    #[test]
    fn address_rejects_non_hex() {
        let err = Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").unwrap_err();
        assert!(matches!(err, AddressParseError::InvalidHex(_)));
    }

    #[test]
    fn address_serde_round_trip() {
        let addr = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x1111111111111111111111111111111111111111\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn cids_are_distinct_namespaces() {
        let ability = AbilityCid::new("QmAbility");
        let policy = PolicyCid::new("QmPolicy");
        assert_eq!(ability.as_str(), "QmAbility");
        assert_eq!(policy.as_str(), "QmPolicy");
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }
}
