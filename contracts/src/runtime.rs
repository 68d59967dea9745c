//! # Execution Runtime
//!
//! The environment the contracts run in. It owns the world state (one
//! ledger, optionally one bank), the current block height, and the log of
//! receipts for every transaction that went through.
//!
//! ## Execution model
//!
//! Every call submitted through [`Runtime::submit`] is mined in a block of
//! its own, so the height advances by exactly one per successful
//! transaction. Calls are all-or-nothing:
//!
//! 1. Snapshot the world state.
//! 2. Apply the call at `height + 1`.
//! 3. On success, collect the contracts' events into a [`Receipt`] and
//!    commit the new height.
//! 4. On failure, restore the snapshot. Height, nonces, balances, stakes,
//!    confirmations and buffered events are exactly as they were.
//!
//! A stake whose inner custody transfer fails therefore never leaves a
//! reward mint or a moved checkpoint behind.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use tinybank_protocol::config::{
    BankParams, ConfigError, DeploymentConfig, LedgerParams, GENESIS_HEIGHT,
};
use tinybank_protocol::{Address, Amount, BlockHeight};

use crate::bank::{Bank, BankError, BankEvent, CallContext};
use crate::ledger::{Ledger, LedgerError, LedgerEvent};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the runtime. Any of these means the transaction was
/// reverted and nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The ledger rejected the call.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The bank rejected the call.
    #[error(transparent)]
    Bank(#[from] BankError),

    /// A ledger call was sent before any ledger was deployed.
    #[error("ledger not deployed")]
    LedgerNotDeployed,

    /// A bank call was sent before any bank was deployed.
    #[error("bank not deployed")]
    BankNotDeployed,

    /// The runtime hosts one contract of each kind.
    #[error("{0} already deployed")]
    AlreadyDeployed(ContractKind),

    /// The chain height would exceed `u64::MAX`.
    #[error("block height overflow")]
    HeightOverflow,

    /// The call could not be encoded for hashing.
    #[error("failed to encode call: {0}")]
    Encoding(String),
}

/// Errors raised while standing up a deployment from a config.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The config failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// One of the deployment transactions reverted.
    #[error("deployment reverted: {0}")]
    Execution(#[from] ExecutionError),
}

impl ExecutionError {
    /// The revert reason as an external caller would see it: the message of
    /// the innermost failure. A stake that fails on a missing allowance
    /// reverts with `"insufficient allownce"`, not with the bank's wrapper.
    pub fn reason(&self) -> String {
        match self {
            ExecutionError::Bank(BankError::TransferFailed(inner))
            | ExecutionError::Bank(BankError::RewardMintFailed(inner)) => inner.to_string(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// The two kinds of contract the runtime hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// The token ledger.
    Ledger,
    /// The staking bank.
    Bank,
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractKind::Ledger => write!(f, "ledger"),
            ContractKind::Bank => write!(f, "bank"),
        }
    }
}

/// Methods on the token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerCall {
    /// `transfer(amount, to)`.
    Transfer { amount: Amount, to: Address },
    /// `approve(spender, amount)`.
    Approve { spender: Address, amount: Amount },
    /// `transferFrom(from, to, amount)`.
    TransferFrom {
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// `mint(to, amount)`; manager only.
    Mint { to: Address, amount: Amount },
    /// `setManager(manager)`; owner only, once.
    SetManager { manager: Address },
}

/// Methods on the staking bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BankCall {
    /// `stake(amount)`.
    Stake { amount: Amount },
    /// `withdraw(amount)`.
    Withdraw { amount: Amount },
    /// `confirm()`; managers only.
    Confirm,
    /// `setRewardPerBlock(rate)`; owner only, after a full quorum.
    SetRewardPerBlock { reward_per_block: Amount },
}

/// A transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    /// Deploy the token ledger; the sender becomes its owner.
    DeployLedger(LedgerParams),
    /// Deploy the bank against the already deployed ledger.
    DeployBank(BankParams),
    /// Call the ledger.
    Ledger(LedgerCall),
    /// Call the bank.
    Bank(BankCall),
}

impl From<LedgerCall> for Call {
    fn from(call: LedgerCall) -> Self {
        Call::Ledger(call)
    }
}

impl From<BankCall> for Call {
    fn from(call: BankCall) -> Self {
        Call::Bank(call)
    }
}

/// Anything a transaction emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A contract was created.
    Deployed {
        /// Contract kind.
        kind: ContractKind,
        /// Address it was deployed at.
        address: Address,
    },
    /// Emitted by the ledger.
    Ledger(LedgerEvent),
    /// Emitted by the bank.
    Bank(BankEvent),
}

/// Record of a successfully executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hex-encoded BLAKE3 hash of `(height, sender, call)`.
    pub tx_hash: String,
    /// Block the transaction was mined in.
    pub height: BlockHeight,
    /// Transaction sender.
    pub sender: Address,
    /// The executed payload.
    pub call: Call,
    /// Events in emission order per contract: deployment first, then the
    /// ledger's, then the bank's.
    pub events: Vec<Event>,
    /// Wall-clock time of execution. Informational only; rewards are
    /// computed from heights.
    pub executed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Everything a transaction can change.
#[derive(Debug, Clone, Default)]
struct World {
    ledger: Option<Ledger>,
    bank: Option<Bank>,
    /// Successful transactions per sender; feeds contract address derivation.
    nonces: HashMap<Address, u64>,
}

/// Single-threaded, serialized transaction executor.
#[derive(Debug, Clone)]
pub struct Runtime {
    height: BlockHeight,
    world: World,
    receipts: Vec<Receipt>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// An empty chain at the genesis height.
    pub fn new() -> Self {
        Self {
            height: GENESIS_HEIGHT,
            world: World::default(),
            receipts: Vec::new(),
        }
    }

    /// Deploys the ledger and the bank described by `config`, then makes the
    /// bank the ledger's manager. Three blocks are mined.
    pub fn from_config(config: &DeploymentConfig) -> Result<Self, BootstrapError> {
        config.validate()?;
        let mut runtime = Self::new();
        runtime.bootstrap(config)?;
        info!(
            height = runtime.height,
            deployer = %config.deployer,
            "deployment bootstrapped"
        );
        Ok(runtime)
    }

    fn bootstrap(&mut self, config: &DeploymentConfig) -> Result<(), ExecutionError> {
        self.deploy_ledger(config.deployer, config.ledger.clone())?;
        let bank = self.deploy_bank(config.deployer, config.bank.clone())?;
        self.submit(
            config.deployer,
            LedgerCall::SetManager { manager: bank }.into(),
        )?;
        Ok(())
    }

    /// Deploys the token ledger and returns its address.
    pub fn deploy_ledger(
        &mut self,
        deployer: Address,
        params: LedgerParams,
    ) -> Result<Address, ExecutionError> {
        self.submit(deployer, Call::DeployLedger(params))?;
        self.world
            .ledger
            .as_ref()
            .map(Ledger::address)
            .ok_or(ExecutionError::LedgerNotDeployed)
    }

    /// Deploys the bank against the deployed ledger and returns its address.
    pub fn deploy_bank(
        &mut self,
        deployer: Address,
        params: BankParams,
    ) -> Result<Address, ExecutionError> {
        self.submit(deployer, Call::DeployBank(params))?;
        self.world
            .bank
            .as_ref()
            .map(Bank::address)
            .ok_or(ExecutionError::BankNotDeployed)
    }

    /// Mines `call` from `sender` in the next block.
    ///
    /// # Errors
    ///
    /// Any error reverts the transaction completely; the height does not
    /// advance and no receipt is recorded.
    pub fn submit(&mut self, sender: Address, call: Call) -> Result<Receipt, ExecutionError> {
        let height = self
            .height
            .checked_add(1)
            .ok_or(ExecutionError::HeightOverflow)?;
        let tx_hash = tx_hash(height, &sender, &call)?;
        let snapshot = self.world.clone();

        let events = match self.apply(sender, height, &call) {
            Ok(events) => events,
            Err(e) => {
                self.world = snapshot;
                warn!(%sender, height, reason = %e.reason(), "transaction reverted");
                return Err(e);
            }
        };

        *self.world.nonces.entry(sender).or_insert(0) += 1;
        self.height = height;

        let receipt = Receipt {
            tx_hash,
            height,
            sender,
            call,
            events,
            executed_at: Utc::now(),
        };
        debug!(
            tx_hash = %receipt.tx_hash,
            height,
            %sender,
            events = receipt.events.len(),
            "transaction mined"
        );
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Mines `blocks` empty blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::HeightOverflow`] if the height would wrap;
    /// the height is left unchanged.
    pub fn advance_blocks(&mut self, blocks: BlockHeight) -> Result<(), ExecutionError> {
        self.height = self
            .height
            .checked_add(blocks)
            .ok_or(ExecutionError::HeightOverflow)?;
        debug!(height = self.height, blocks, "advanced empty blocks");
        Ok(())
    }

    fn apply(
        &mut self,
        sender: Address,
        height: BlockHeight,
        call: &Call,
    ) -> Result<Vec<Event>, ExecutionError> {
        let nonce = self.world.nonces.get(&sender).copied().unwrap_or(0);
        let World { ledger, bank, .. } = &mut self.world;
        let mut events = Vec::new();

        match call {
            Call::DeployLedger(params) => {
                if ledger.is_some() {
                    return Err(ExecutionError::AlreadyDeployed(ContractKind::Ledger));
                }
                let address = Address::derive_contract(&sender, nonce);
                *ledger = Some(Ledger::new(address, sender, params.clone())?);
                events.push(Event::Deployed {
                    kind: ContractKind::Ledger,
                    address,
                });
            }
            Call::DeployBank(params) => {
                if bank.is_some() {
                    return Err(ExecutionError::AlreadyDeployed(ContractKind::Bank));
                }
                let token = ledger.as_ref().ok_or(ExecutionError::LedgerNotDeployed)?;
                let address = Address::derive_contract(&sender, nonce);
                *bank = Some(Bank::new(address, token, params.clone())?);
                events.push(Event::Deployed {
                    kind: ContractKind::Bank,
                    address,
                });
            }
            Call::Ledger(call) => {
                let ledger = ledger.as_mut().ok_or(ExecutionError::LedgerNotDeployed)?;
                match *call {
                    LedgerCall::Transfer { amount, to } => ledger.transfer(sender, amount, to)?,
                    LedgerCall::Approve { spender, amount } => {
                        ledger.approve(sender, spender, amount)
                    }
                    LedgerCall::TransferFrom { from, to, amount } => {
                        ledger.transfer_from(sender, from, to, amount)?
                    }
                    LedgerCall::Mint { to, amount } => ledger.mint(sender, to, amount)?,
                    LedgerCall::SetManager { manager } => ledger.set_manager(sender, manager)?,
                }
            }
            Call::Bank(call) => {
                let bank = bank.as_mut().ok_or(ExecutionError::BankNotDeployed)?;
                let ledger = ledger.as_mut().ok_or(ExecutionError::LedgerNotDeployed)?;
                let ctx = CallContext::new(sender, height);
                match *call {
                    BankCall::Stake { amount } => bank.stake(&ctx, ledger, amount)?,
                    BankCall::Withdraw { amount } => bank.withdraw(&ctx, ledger, amount)?,
                    BankCall::Confirm => bank.confirm(sender)?,
                    BankCall::SetRewardPerBlock { reward_per_block } => {
                        bank.set_reward_per_block(sender, reward_per_block)?
                    }
                }
            }
        }

        if let Some(ledger) = ledger.as_mut() {
            events.extend(ledger.drain_events().into_iter().map(Event::Ledger));
        }
        if let Some(bank) = bank.as_mut() {
            events.extend(bank.drain_events().into_iter().map(Event::Bank));
        }
        Ok(events)
    }

    // -- views ------------------------------------------------------------------

    /// Height of the last mined block.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// The deployed ledger, if any.
    pub fn ledger(&self) -> Option<&Ledger> {
        self.world.ledger.as_ref()
    }

    /// The deployed bank, if any.
    pub fn bank(&self) -> Option<&Bank> {
        self.world.bank.as_ref()
    }

    /// Receipts of every successful transaction, oldest first.
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Successful transactions sent by `account`.
    pub fn nonce(&self, account: &Address) -> u64 {
        self.world.nonces.get(account).copied().unwrap_or(0)
    }
}

/// `BLAKE3(height || sender || json(call))`, hex-encoded.
fn tx_hash(height: BlockHeight, sender: &Address, call: &Call) -> Result<String, ExecutionError> {
    let payload = serde_json::to_vec(call).map_err(|e| ExecutionError::Encoding(e.to_string()))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&height.to_be_bytes());
    hasher.update(sender.as_bytes());
    hasher.update(&payload);
    Ok(hex::encode(hasher.finalize().as_bytes()))
}
