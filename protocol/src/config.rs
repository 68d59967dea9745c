//! # Protocol Configuration & Constants
//!
//! Every magic number in TinyBank lives here, alongside the
//! [`DeploymentConfig`] document that bundles the parameters needed to stand
//! up a ledger and a bank in one go.
//!
//! A deployment config is plain JSON:
//!
//! ```json
//! {
//!   "deployer": "0x…",
//!   "ledger": { "name": "MyToken", "symbol": "MT", "decimals": 18, "initial_mint": 100 },
//!   "bank": { "owner": "0x…", "managers": ["0x…", "0x…", "0x…", "0x…", "0x…"] }
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Token amounts in the smallest denomination (scaled by `10^decimals`).
pub type Amount = u128;

/// Logical time. One block per executed transaction.
pub type BlockHeight = u64;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of bank managers that must all confirm a protected mutation.
pub const MANAGER_QUORUM: usize = 5;

/// Largest decimal precision a ledger may declare. `10^38` is the biggest
/// power of ten that still fits in a `u128`.
pub const MAX_DECIMALS: u8 = 38;

/// Default decimal precision, matching the usual 18-decimal token layout.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Default token name for fixtures and config templates.
pub const DEFAULT_TOKEN_NAME: &str = "MyToken";

/// Default token symbol.
pub const DEFAULT_TOKEN_SYMBOL: &str = "MT";

/// Default initial mint, in whole tokens.
pub const DEFAULT_INITIAL_MINT: Amount = 100;

/// Default reward per block, in whole tokens. Scaled by the ledger's
/// decimals at bank deployment.
pub const DEFAULT_REWARD_TOKENS_PER_BLOCK: Amount = 1;

/// Height of a freshly created chain, before any transaction is mined.
pub const GENESIS_HEIGHT: BlockHeight = 0;

/// Returns `10^decimals`, or `None` when it does not fit in an [`Amount`].
pub fn unit_scale(decimals: u8) -> Option<Amount> {
    (10 as Amount).checked_pow(u32::from(decimals))
}

/// Scales a whole-token amount to the smallest denomination.
pub fn to_base_units(whole: Amount, decimals: u8) -> Option<Amount> {
    unit_scale(decimals)?.checked_mul(whole)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a deployment config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for this schema.
    #[error("invalid deployment config: {0}")]
    Json(#[from] serde_json::Error),

    /// The config file could not be read.
    #[error("failed to read deployment config: {0}")]
    Io(#[from] std::io::Error),

    /// Decimal precision exceeds [`MAX_DECIMALS`].
    #[error("decimals {0} exceeds the maximum of 38")]
    InvalidDecimals(u8),

    /// The initial mint overflows once scaled by `10^decimals`.
    #[error("initial mint of {initial_mint} overflows at {decimals} decimals")]
    SupplyOverflow {
        /// Whole-token mint amount.
        initial_mint: Amount,
        /// Declared decimal precision.
        decimals: u8,
    },

    /// A role that needs an identity was given the zero address.
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),

    /// The same address appears twice in the manager list.
    #[error("duplicate manager: {0}")]
    DuplicateManager(Address),
}

// ---------------------------------------------------------------------------
// Deployment parameters
// ---------------------------------------------------------------------------

/// Constructor parameters for a token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParams {
    /// Human-readable token name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Decimal precision.
    pub decimals: u8,
    /// Whole tokens credited to the deployer, scaled by `10^decimals`.
    pub initial_mint: Amount,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            name: DEFAULT_TOKEN_NAME.to_string(),
            symbol: DEFAULT_TOKEN_SYMBOL.to_string(),
            decimals: DEFAULT_DECIMALS,
            initial_mint: DEFAULT_INITIAL_MINT,
        }
    }
}

impl LedgerParams {
    /// Checks precision and that the scaled initial supply fits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::InvalidDecimals(self.decimals));
        }
        to_base_units(self.initial_mint, self.decimals).ok_or(ConfigError::SupplyOverflow {
            initial_mint: self.initial_mint,
            decimals: self.decimals,
        })?;
        Ok(())
    }
}

/// Constructor parameters for a staking bank.
///
/// The staking ledger is not part of the params: the runtime binds the bank
/// to the ledger it deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankParams {
    /// The only address allowed to change the reward rate.
    pub owner: Address,
    /// The fixed governance quorum.
    pub managers: [Address; MANAGER_QUORUM],
    /// Reward per block in base units. Defaults to one whole token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_per_block: Option<Amount>,
}

impl BankParams {
    /// Rejects zero addresses and duplicate managers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_zero() {
            return Err(ConfigError::ZeroAddress("bank owner"));
        }
        let mut seen = HashSet::with_capacity(MANAGER_QUORUM);
        for manager in &self.managers {
            if manager.is_zero() {
                return Err(ConfigError::ZeroAddress("bank manager"));
            }
            if !seen.insert(*manager) {
                return Err(ConfigError::DuplicateManager(*manager));
            }
        }
        Ok(())
    }
}

/// A complete ledger + bank deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Account that deploys both contracts and receives the initial mint.
    pub deployer: Address,
    /// Token ledger parameters.
    pub ledger: LedgerParams,
    /// Staking bank parameters.
    pub bank: BankParams,
}

impl DeploymentConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Renders the config as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployer.is_zero() {
            return Err(ConfigError::ZeroAddress("deployer"));
        }
        self.ledger.validate()?;
        self.bank.validate()
    }
}
