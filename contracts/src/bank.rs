//! # Staking Bank Contract
//!
//! Custodies ledger tokens on behalf of stakers and pays them a reward for
//! every block their stake sits in the bank.
//!
//! ## Stake accounting
//!
//! Staking pulls tokens from the caller into the bank's own ledger account
//! (the caller must have approved the bank first). Withdrawing sends them
//! back. The bank keeps `total_staked == Σ staked` and never holds less on
//! the ledger than it owes in principal.
//!
//! ## Reward accrual
//!
//! Every stake and withdraw first settles the caller's pending reward:
//!
//! ```text
//! reward = reward_per_block * (current_height - last_accrual_height)
//! ```
//!
//! The reward is a flat rate per block for any account with a non-zero
//! stake. It does not depend on how much is staked or on other stakers.
//! Rewards are minted fresh through the ledger's manager hook, so the bank
//! must hold the ledger's manager role and never dips into custody to pay.
//!
//! ## Governance
//!
//! The reward rate can only be changed by the owner, and only after all five
//! managers have confirmed via [`Bank::confirm`]; see
//! [`crate::governance`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use tinybank_protocol::config::{
    to_base_units, BankParams, DEFAULT_REWARD_TOKENS_PER_BLOCK, MANAGER_QUORUM,
};
use tinybank_protocol::{Address, Amount, BlockHeight};

use crate::governance::{GateState, GovernanceError, GovernanceGate};
use crate::ledger::{Ledger, LedgerError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during bank operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    /// Governance failures keep their literal revert reasons.
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    /// Reward rate change attempted by someone other than the owner.
    #[error("only the owner can change the reward rate")]
    Unauthorized,

    /// Withdrawal exceeds the caller's recorded stake.
    #[error("insufficient staked amount: staked {staked}, requested {requested}")]
    InsufficientStake {
        /// The caller's current stake.
        staked: Amount,
        /// The amount the caller tried to withdraw.
        requested: Amount,
    },

    /// Moving principal in or out of custody failed on the ledger.
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] LedgerError),

    /// The ledger refused to mint the reward (usually: the bank is not the
    /// ledger's manager).
    #[error("reward mint failed: {0}")]
    RewardMintFailed(#[source] LedgerError),

    /// The bank was handed a ledger other than the one it was deployed with.
    #[error("wrong staking token: expected {expected}, got {actual}")]
    WrongToken {
        /// Ledger address bound at deployment.
        expected: Address,
        /// Ledger address that was passed in.
        actual: Address,
    },

    /// The owner is the zero address.
    #[error("owner must not be the zero address")]
    InvalidOwner,

    /// The default reward rate cannot be expressed at the ledger's decimals.
    #[error("amount overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Staking token interface
// ---------------------------------------------------------------------------

/// What the bank needs from the ledger it custodies.
///
/// Every mutating call carries the acting address explicitly; for calls made
/// by the bank that is always the bank's own contract address, which is how
/// the ledger tells the bank apart from any other caller.
pub trait StakingToken {
    /// Contract address of the token.
    fn address(&self) -> Address;

    /// Decimal precision of the token.
    fn decimals(&self) -> u8;

    /// Balance of `account`.
    fn balance_of(&self, account: &Address) -> Amount;

    /// How much `spender` may still pull from `owner`.
    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    /// Moves `amount` from `caller` to `to`.
    fn transfer(&mut self, caller: Address, amount: Amount, to: Address)
        -> Result<(), LedgerError>;

    /// Spends `caller`'s allowance on `from`.
    fn transfer_from(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Mints `amount` to `to`; only succeeds for the token's manager.
    fn mint(&mut self, caller: Address, to: Address, amount: Amount) -> Result<(), LedgerError>;
}

impl StakingToken for Ledger {
    fn address(&self) -> Address {
        Ledger::address(self)
    }

    fn decimals(&self) -> u8 {
        Ledger::decimals(self)
    }

    fn balance_of(&self, account: &Address) -> Amount {
        Ledger::balance_of(self, account)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        Ledger::allowance(self, owner, spender)
    }

    fn transfer(
        &mut self,
        caller: Address,
        amount: Amount,
        to: Address,
    ) -> Result<(), LedgerError> {
        Ledger::transfer(self, caller, amount, to)
    }

    fn transfer_from(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        Ledger::transfer_from(self, caller, from, to, amount)
    }

    fn mint(&mut self, caller: Address, to: Address, amount: Amount) -> Result<(), LedgerError> {
        Ledger::mint(self, caller, to, amount)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who is calling, and at which block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// The transaction sender.
    pub caller: Address,
    /// Height of the block the call executes in.
    pub height: BlockHeight,
}

impl CallContext {
    /// Convenience constructor.
    pub fn new(caller: Address, height: BlockHeight) -> Self {
        Self { caller, height }
    }
}

/// Per-account staking state. Created zeroed on first stake and never
/// removed; a zero stake just means the account is dormant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    /// Principal currently in custody for this account.
    pub staked: Amount,
    /// Height at which the account's reward was last settled.
    pub last_accrual_height: BlockHeight,
}

/// Notifications emitted by the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankEvent {
    /// Principal moved into custody.
    Staked {
        /// Staking account.
        account: Address,
        /// Amount added.
        amount: Amount,
    },
    /// Principal returned from custody.
    Withdrawn {
        /// Withdrawing account.
        account: Address,
        /// Amount returned.
        amount: Amount,
    },
    /// Reward minted to a staker.
    RewardPaid {
        /// Rewarded account.
        account: Address,
        /// Minted amount.
        amount: Amount,
        /// Blocks the reward covers.
        blocks: BlockHeight,
    },
    /// A manager confirmed.
    Confirmed {
        /// Confirming manager.
        manager: Address,
        /// Confirmations in the current cycle, including this one.
        confirmations: usize,
    },
    /// The reward rate changed and the gate reset.
    RewardRateChanged {
        /// Rate before the change.
        old: Amount,
        /// Rate after the change.
        new: Amount,
    },
}

// ---------------------------------------------------------------------------
// Bank
// ---------------------------------------------------------------------------

/// The staking bank state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    /// Contract address; the ledger account holding custody.
    address: Address,
    /// Address of the ledger being staked.
    staking_token: Address,
    /// The only address allowed to change the reward rate.
    owner: Address,
    /// `Σ stakes[*].staked`.
    total_staked: Amount,
    /// Reward minted per block per staking account.
    reward_per_block: Amount,
    /// Per-account stake records.
    stakes: HashMap<Address, StakeRecord>,
    /// Unanimous confirmation gate for rate changes.
    gate: GovernanceGate,
    /// Events not yet collected by the execution environment.
    #[serde(skip)]
    events: Vec<BankEvent>,
}

impl Bank {
    /// Deploys a bank at `address` staking `token`.
    ///
    /// When `params.reward_per_block` is `None` the rate defaults to one
    /// whole token (`10^decimals`).
    ///
    /// # Errors
    ///
    /// Returns [`BankError::InvalidOwner`] for a zero owner and
    /// [`GovernanceError::InvalidManagers`] for a bad manager set.
    pub fn new<T: StakingToken + ?Sized>(
        address: Address,
        token: &T,
        params: BankParams,
    ) -> Result<Self, BankError> {
        if params.owner.is_zero() {
            return Err(BankError::InvalidOwner);
        }
        let gate = GovernanceGate::new(params.managers)?;
        let reward_per_block = match params.reward_per_block {
            Some(rate) => rate,
            None => to_base_units(DEFAULT_REWARD_TOKENS_PER_BLOCK, token.decimals())
                .ok_or(BankError::Overflow)?,
        };

        info!(
            %address,
            staking_token = %token.address(),
            owner = %params.owner,
            reward_per_block,
            "bank deployed"
        );

        Ok(Self {
            address,
            staking_token: token.address(),
            owner: params.owner,
            total_staked: 0,
            reward_per_block,
            stakes: HashMap::new(),
            gate,
            events: Vec::new(),
        })
    }

    // -- stake accounting -------------------------------------------------------

    /// Settles the caller's reward, then moves `amount` into custody.
    ///
    /// The caller must have approved the bank for at least `amount`. The
    /// pull is checked against the ledger before anything is minted, so a
    /// rejected stake leaves supply and checkpoint untouched. The reward
    /// being settled counts toward the caller's balance.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::TransferFailed`] if the ledger would refuse the
    /// pull (missing allowance or balance).
    pub fn stake<T: StakingToken + ?Sized>(
        &mut self,
        ctx: &CallContext,
        token: &mut T,
        amount: Amount,
    ) -> Result<(), BankError> {
        self.ensure_token(&*token)?;
        let settlement = self.settlement(&ctx.caller, ctx.height)?;

        let record = self.record(&ctx.caller);
        let staked = record.staked.checked_add(amount).ok_or(BankError::Overflow)?;
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or(BankError::Overflow)?;

        if token.allowance(&ctx.caller, &self.address) < amount {
            return Err(BankError::TransferFailed(LedgerError::InsufficientAllowance));
        }
        if token.balance_of(&ctx.caller).saturating_add(settlement.0) < amount {
            return Err(BankError::TransferFailed(LedgerError::InsufficientBalance));
        }

        self.accrue(ctx, token, settlement)?;

        token
            .transfer_from(self.address, ctx.caller, self.address, amount)
            .map_err(BankError::TransferFailed)?;

        self.stakes.entry(ctx.caller).or_default().staked = staked;
        self.total_staked = total;
        self.events.push(BankEvent::Staked {
            account: ctx.caller,
            amount,
        });
        info!(account = %ctx.caller, amount, staked, total_staked = total, "staked");
        Ok(())
    }

    /// Settles the caller's reward, then returns `amount` of principal.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::InsufficientStake`] if `amount` exceeds the
    /// caller's stake, and [`BankError::TransferFailed`] if custody cannot
    /// pay out. Both are detected before the reward is minted.
    pub fn withdraw<T: StakingToken + ?Sized>(
        &mut self,
        ctx: &CallContext,
        token: &mut T,
        amount: Amount,
    ) -> Result<(), BankError> {
        self.ensure_token(&*token)?;

        let current = self.record(&ctx.caller).staked;
        if amount > current {
            return Err(BankError::InsufficientStake {
                staked: current,
                requested: amount,
            });
        }

        let settlement = self.settlement(&ctx.caller, ctx.height)?;
        let staked = current - amount;
        let total = self
            .total_staked
            .checked_sub(amount)
            .ok_or(BankError::Overflow)?;

        if token.balance_of(&self.address) < amount {
            return Err(BankError::TransferFailed(LedgerError::InsufficientBalance));
        }

        self.accrue(ctx, token, settlement)?;

        token
            .transfer(self.address, amount, ctx.caller)
            .map_err(BankError::TransferFailed)?;

        self.stakes.entry(ctx.caller).or_default().staked = staked;
        self.total_staked = total;
        self.events.push(BankEvent::Withdrawn {
            account: ctx.caller,
            amount,
        });
        info!(account = %ctx.caller, amount, staked, total_staked = total, "withdrawn");
        Ok(())
    }

    // -- reward accrual -----------------------------------------------------------

    /// Reward `account` would receive if it settled at `height`.
    pub fn pending_reward(&self, account: &Address, height: BlockHeight) -> Result<Amount, BankError> {
        self.settlement(account, height).map(|(reward, _)| reward)
    }

    /// `(reward, blocks)` owed to `account` at `height`. Dormant accounts
    /// are owed nothing regardless of elapsed blocks.
    fn settlement(
        &self,
        account: &Address,
        height: BlockHeight,
    ) -> Result<(Amount, BlockHeight), BankError> {
        let record = self.record(account);
        let blocks = height.saturating_sub(record.last_accrual_height);
        if record.staked == 0 {
            return Ok((0, blocks));
        }
        let reward = self
            .reward_per_block
            .checked_mul(Amount::from(blocks))
            .ok_or(BankError::Overflow)?;
        Ok((reward, blocks))
    }

    /// Mints a settlement computed by [`Bank::settlement`] and moves the
    /// checkpoint to the current height. Nothing changes if the mint fails.
    fn accrue<T: StakingToken + ?Sized>(
        &mut self,
        ctx: &CallContext,
        token: &mut T,
        (reward, blocks): (Amount, BlockHeight),
    ) -> Result<Amount, BankError> {
        if reward > 0 {
            token
                .mint(self.address, ctx.caller, reward)
                .map_err(BankError::RewardMintFailed)?;
            self.events.push(BankEvent::RewardPaid {
                account: ctx.caller,
                amount: reward,
                blocks,
            });
            debug!(account = %ctx.caller, reward, blocks, "reward paid");
        }

        self.stakes.entry(ctx.caller).or_default().last_accrual_height = ctx.height;
        Ok(reward)
    }

    // -- governance -----------------------------------------------------------------

    /// Records a manager confirmation for the next rate change.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotAManager`] for anyone outside the
    /// manager set.
    pub fn confirm(&mut self, caller: Address) -> Result<(), BankError> {
        let fresh = self.gate.confirm(&caller)?;
        let confirmations = self.gate.confirmations();
        if fresh {
            self.events.push(BankEvent::Confirmed {
                manager: caller,
                confirmations,
            });
        }
        debug!(manager = %caller, confirmations, fresh, "confirmation recorded");
        Ok(())
    }

    /// Changes the reward rate. Owner only, and only with every manager's
    /// confirmation; the confirmations are consumed by the change.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::Unauthorized`] for non-owners and
    /// [`GovernanceError::QuorumNotMet`] before all managers confirmed.
    pub fn set_reward_per_block(
        &mut self,
        caller: Address,
        reward_per_block: Amount,
    ) -> Result<(), BankError> {
        if caller != self.owner {
            return Err(BankError::Unauthorized);
        }
        let old = self.reward_per_block;
        self.gate
            .execute(|| self.reward_per_block = reward_per_block)?;

        self.events.push(BankEvent::RewardRateChanged {
            old,
            new: reward_per_block,
        });
        info!(old, new = reward_per_block, "reward rate changed, confirmations reset");
        Ok(())
    }

    // -- views ------------------------------------------------------------------------

    /// Contract address of the bank.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Address of the staked ledger.
    pub fn staking_token(&self) -> Address {
        self.staking_token
    }

    /// Owner of the reward rate.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Principal staked by `account`.
    pub fn staked(&self, account: &Address) -> Amount {
        self.record(account).staked
    }

    /// Principal staked across all accounts.
    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    /// Height at which `account` last settled, or zero if it never staked.
    pub fn last_accrual_height(&self, account: &Address) -> BlockHeight {
        self.record(account).last_accrual_height
    }

    /// Current reward per block.
    pub fn reward_per_block(&self) -> Amount {
        self.reward_per_block
    }

    /// The governance managers.
    pub fn managers(&self) -> &[Address; MANAGER_QUORUM] {
        self.gate.managers()
    }

    /// Confirmations collected in the current cycle.
    pub fn confirmations(&self) -> usize {
        self.gate.confirmations()
    }

    /// Whether `manager` has confirmed in the current cycle.
    pub fn has_confirmed(&self, manager: &Address) -> bool {
        self.gate.has_confirmed(manager)
    }

    /// Governance cycle state.
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Whether custody on `token` covers every staked unit of principal.
    pub fn is_solvent<T: StakingToken + ?Sized>(&self, token: &T) -> bool {
        token.balance_of(&self.address) >= self.total_staked
    }

    /// Takes every event buffered since the last call.
    pub fn drain_events(&mut self) -> Vec<BankEvent> {
        std::mem::take(&mut self.events)
    }

    fn record(&self, account: &Address) -> StakeRecord {
        self.stakes.get(account).copied().unwrap_or_default()
    }

    fn ensure_token<T: StakingToken + ?Sized>(&self, token: &T) -> Result<(), BankError> {
        let actual = token.address();
        if actual != self.staking_token {
            return Err(BankError::WrongToken {
                expected: self.staking_token,
                actual,
            });
        }
        Ok(())
    }
}
