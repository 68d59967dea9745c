//! # Account Addresses
//!
//! Every participant on the ledger (externally owned accounts and deployed
//! contracts alike) is identified by a 20-byte [`Address`]. Addresses are
//! rendered as `0x`-prefixed lowercase hex, which is also the serde wire
//! format.
//!
//! There are three ways to get one:
//!
//! - [`Address::from_public_key`]: the last 20 bytes of `BLAKE3(pubkey)`.
//! - [`Address::from_label`]: deterministic identities for tests and
//!   fixtures (`"owner"`, `"manager-1"`, ...).
//! - [`Address::derive_contract`]: contract addresses, derived from the
//!   deployer and the deployer's nonce so that two deployments never collide.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Domain separator for label-derived addresses.
const LABEL_DOMAIN: &[u8] = b"tinybank.address.label";

/// Domain separator for contract addresses.
const CONTRACT_DOMAIN: &[u8] = b"tinybank.address.contract";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur when parsing an address from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string is missing the `0x` prefix.
    #[error("address must start with 0x")]
    MissingPrefix,

    /// The hex payload could not be decoded.
    #[error("invalid address hex: {0}")]
    InvalidHex(String),

    /// The decoded payload has the wrong length.
    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The null address. Mints are recorded as transfers from here, and it
    /// is never accepted as an owner, manager, or recipient of a role.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Returns `true` for [`Address::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Derives the address controlled by an Ed25519 public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self::truncate(blake3::hash(key.as_bytes()).as_bytes())
    }

    /// Derives a deterministic address from a human-readable label.
    ///
    /// The same label always yields the same address, which makes this the
    /// natural way to name fixture accounts.
    pub fn from_label(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(LABEL_DOMAIN);
        hasher.update(label.as_bytes());
        Self::truncate(hasher.finalize().as_bytes())
    }

    /// Derives the address of a contract created by `deployer` when its
    /// account nonce was `nonce`.
    pub fn derive_contract(deployer: &Address, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CONTRACT_DOMAIN);
        hasher.update(&deployer.0);
        hasher.update(&nonce.to_be_bytes());
        Self::truncate(hasher.finalize().as_bytes())
    }

    /// Keeps the trailing 20 bytes of a 32-byte digest.
    fn truncate(digest: &[u8; 32]) -> Self {
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(out)
    }

    /// Renders the address as `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
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
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        let bytes = hex::decode(body).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let array: [u8; ADDRESS_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn hex_roundtrip_through_from_str() {
        let addr = Address::from_label("owner");
        let parsed: Address = addr.to_hex().parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(addr.to_hex().len(), 2 + ADDRESS_LENGTH * 2);
    }

    #[test]
    fn labels_are_deterministic_and_distinct() {
        assert_eq!(Address::from_label("a"), Address::from_label("a"));
        assert_ne!(Address::from_label("a"), Address::from_label("b"));
        assert!(!Address::from_label("a").is_zero());
    }

    #[test]
    fn contract_address_depends_on_nonce() {
        let deployer = Address::from_label("deployer");
        assert_ne!(
            Address::derive_contract(&deployer, 0),
            Address::derive_contract(&deployer, 1)
        );
    }

    #[test]
    fn public_key_address_is_stable() {
        let key = SigningKey::generate(&mut OsRng);
        let vk = key.verifying_key();
        assert_eq!(Address::from_public_key(&vk), Address::from_public_key(&vk));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "abcd".parse::<Address>(),
            Err(AddressError::MissingPrefix)
        );
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
        assert_eq!(
            "0xabcd".parse::<Address>(),
            Err(AddressError::InvalidLength(2))
        );
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = Address::from_label("serde");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
