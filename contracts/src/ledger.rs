//! # Token Ledger Contract
//!
//! A fungible-balance registry with allowances and a single privileged
//! minter. The ledger is the asset the bank custodies and the asset it pays
//! rewards in.
//!
//! ## Roles
//!
//! - **Owner**: the deployer. Its only power is assigning the manager, once.
//! - **Manager**: the only address allowed to [`mint`](Ledger::mint). In a
//!   full deployment this is the bank's contract address, which is how the
//!   bank gets to pay rewards without holding a reward float.
//!
//! ## Invariants
//!
//! - `Σ balances == total_supply` after every successful call.
//! - An allowance only changes through [`approve`](Ledger::approve) (absolute
//!   set) or by being spent in [`transfer_from`](Ledger::transfer_from).
//! - Every operation validates before it writes, so an `Err` leaves the
//!   ledger untouched.
//!
//! The revert reasons (`"insufficient balance"`, `"insufficient allownce"`)
//! are part of the external contract and are reproduced byte for byte,
//! misspelling included.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use tinybank_protocol::config::{to_base_units, LedgerParams};
use tinybank_protocol::{Address, Amount};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The sender does not hold enough tokens.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// The spender's allowance does not cover the amount.
    #[error("insufficient allownce")]
    InsufficientAllowance,

    /// Mint attempted by anyone other than the manager.
    #[error("only the manager can mint")]
    Unauthorized,

    /// Manager assignment attempted by anyone other than the owner.
    #[error("only the owner can assign the manager")]
    NotOwner,

    /// The manager role has already been handed out.
    #[error("manager already assigned")]
    ManagerAlreadySet,

    /// The zero address was given where an identity is required.
    #[error("zero address")]
    ZeroAddress,

    /// Supply or balance arithmetic would overflow.
    #[error("amount overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Notifications emitted by the ledger. They are buffered until the
/// execution environment collects them with [`Ledger::drain_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Tokens moved. Mints are transfers from [`Address::ZERO`].
    Transfer {
        /// Sending account.
        from: Address,
        /// Receiving account.
        to: Address,
        /// Amount moved, in base units.
        amount: Amount,
    },
    /// An allowance was set. The approving owner is the transaction sender
    /// and is deliberately not part of the payload.
    Approval {
        /// Account allowed to spend.
        spender: Address,
        /// New absolute allowance.
        amount: Amount,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The token ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// Contract address of this ledger.
    address: Address,
    /// Human-readable token name.
    name: String,
    /// Ticker symbol.
    symbol: String,
    /// Decimal precision of every amount.
    decimals: u8,
    /// Sum of all balances.
    total_supply: Amount,
    /// Deployer; may assign the manager once.
    owner: Address,
    /// The sole minter, once assigned.
    manager: Option<Address>,
    /// Per-account balances. Absent means zero.
    balances: HashMap<Address, Amount>,
    /// `owner -> (spender -> amount)`.
    allowances: HashMap<Address, HashMap<Address, Amount>>,
    /// Events not yet collected by the execution environment.
    #[serde(skip)]
    events: Vec<LedgerEvent>,
}

impl Ledger {
    /// Deploys a ledger at `address`, crediting `initial_mint * 10^decimals`
    /// to `deployer`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ZeroAddress`] for a zero deployer and
    /// [`LedgerError::Overflow`] if the scaled supply does not fit.
    pub fn new(
        address: Address,
        deployer: Address,
        params: LedgerParams,
    ) -> Result<Self, LedgerError> {
        if deployer.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let supply =
            to_base_units(params.initial_mint, params.decimals).ok_or(LedgerError::Overflow)?;

        let mut balances = HashMap::new();
        if supply > 0 {
            balances.insert(deployer, supply);
        }

        info!(
            %address,
            %deployer,
            name = %params.name,
            symbol = %params.symbol,
            decimals = params.decimals,
            supply,
            "ledger deployed"
        );

        Ok(Self {
            address,
            name: params.name,
            symbol: params.symbol,
            decimals: params.decimals,
            total_supply: supply,
            owner: deployer,
            manager: None,
            balances,
            allowances: HashMap::new(),
            events: vec![LedgerEvent::Transfer {
                from: Address::ZERO,
                to: deployer,
                amount: supply,
            }],
        })
    }

    // -- roles ----------------------------------------------------------------

    /// Hands the minting role to `manager`. Owner only, and only once.
    pub fn set_manager(&mut self, caller: Address, manager: Address) -> Result<(), LedgerError> {
        if caller != self.owner {
            return Err(LedgerError::NotOwner);
        }
        if manager.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        if self.manager.is_some() {
            return Err(LedgerError::ManagerAlreadySet);
        }
        self.manager = Some(manager);
        info!(ledger = %self.address, %manager, "ledger manager assigned");
        Ok(())
    }

    /// Creates `amount` new tokens for `to`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unauthorized`] unless `caller` is the manager.
    pub fn mint(&mut self, caller: Address, to: Address, amount: Amount) -> Result<(), LedgerError> {
        if self.manager != Some(caller) {
            return Err(LedgerError::Unauthorized);
        }
        let new_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let new_balance = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        self.total_supply = new_supply;
        self.balances.insert(to, new_balance);
        self.events.push(LedgerEvent::Transfer {
            from: Address::ZERO,
            to,
            amount,
        });
        debug!(%to, amount, total_supply = new_supply, "minted");
        Ok(())
    }

    // -- transfers --------------------------------------------------------------

    /// Moves `amount` from `caller` to `to`.
    ///
    /// The argument order is `(amount, to)`, matching what existing callers
    /// of this ledger send.
    pub fn transfer(
        &mut self,
        caller: Address,
        amount: Amount,
        to: Address,
    ) -> Result<(), LedgerError> {
        self.move_balance(caller, to, amount)?;
        debug!(from = %caller, %to, amount, "transfer");
        Ok(())
    }

    /// Sets `caller`'s allowance for `spender` to exactly `amount`.
    pub fn approve(&mut self, caller: Address, spender: Address, amount: Amount) {
        self.allowances
            .entry(caller)
            .or_default()
            .insert(spender, amount);
        self.events.push(LedgerEvent::Approval { spender, amount });
        debug!(owner = %caller, %spender, amount, "approval");
    }

    /// Spends `caller`'s allowance on `from` to move `amount` to `to`.
    ///
    /// The allowance is checked before the balance, so a spender with no
    /// allowance always sees [`LedgerError::InsufficientAllowance`].
    pub fn transfer_from(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(&from, &caller);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance);
        }

        self.move_balance(from, to, amount)?;
        self.allowances
            .entry(from)
            .or_default()
            .insert(caller, allowance - amount);

        debug!(spender = %caller, %from, %to, amount, "transfer_from");
        Ok(())
    }

    /// Validates and applies a balance move, then records the event.
    fn move_balance(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), LedgerError> {
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }

        if from != to {
            let to_balance = self
                .balance_of(&to)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;
            self.balances.insert(from, from_balance - amount);
            self.balances.insert(to, to_balance);
        }

        self.events.push(LedgerEvent::Transfer { from, to, amount });
        Ok(())
    }

    // -- views ------------------------------------------------------------------

    /// Contract address of this ledger.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Token name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Decimal precision.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Total tokens in existence.
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Balance of `account`, zero if it never held tokens.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// How much `spender` may still move out of `owner`'s balance.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|a| a.get(spender))
            .copied()
            .unwrap_or(0)
    }

    /// The deployer.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// The minter, if one has been assigned.
    pub fn manager(&self) -> Option<Address> {
        self.manager
    }

    /// Sum of all balances. Equal to [`total_supply`](Self::total_supply)
    /// whenever the ledger is consistent.
    pub fn sum_of_balances(&self) -> Amount {
        self.balances.values().sum()
    }

    /// Takes every event buffered since the last call.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECIMALS: u8 = 18;
    const ONE: Amount = 1_000_000_000_000_000_000;

    fn deployer() -> Address {
        Address::from_label("signer-0")
    }

    fn other() -> Address {
        Address::from_label("signer-1")
    }

    fn ledger() -> Ledger {
        Ledger::new(
            Address::from_label("ledger"),
            deployer(),
            LedgerParams {
                name: "MyToken".into(),
                symbol: "MT".into(),
                decimals: DECIMALS,
                initial_mint: 100,
            },
        )
        .unwrap()
    }

    #[test]
    fn metadata_views() {
        let l = ledger();
        assert_eq!(l.name(), "MyToken");
        assert_eq!(l.symbol(), "MT");
        assert_eq!(l.decimals(), DECIMALS);
        assert_eq!(l.total_supply(), 100 * ONE);
        assert_eq!(l.owner(), deployer());
        assert_eq!(l.manager(), None);
    }

    #[test]
    fn initial_mint_goes_to_deployer() {
        let mut l = ledger();
        assert_eq!(l.balance_of(&deployer()), 100 * ONE);
        assert_eq!(
            l.drain_events(),
            vec![LedgerEvent::Transfer {
                from: Address::ZERO,
                to: deployer(),
                amount: 100 * ONE,
            }]
        );
    }

    #[test]
    fn construction_overflow_rejected() {
        let result = Ledger::new(
            Address::from_label("ledger"),
            deployer(),
            LedgerParams {
                decimals: 38,
                initial_mint: 1_000,
                ..LedgerParams::default()
            },
        );
        assert_eq!(result.unwrap_err(), LedgerError::Overflow);
    }

    #[test]
    fn transfer_moves_half_a_token() {
        let mut l = ledger();
        l.drain_events();
        let half = ONE / 2;
        l.transfer(deployer(), half, other()).unwrap();
        assert_eq!(l.balance_of(&other()), half);
        assert_eq!(l.balance_of(&deployer()), 100 * ONE - half);
        assert_eq!(
            l.drain_events(),
            vec![LedgerEvent::Transfer {
                from: deployer(),
                to: other(),
                amount: half,
            }]
        );
    }

    #[test]
    fn transfer_more_than_balance_fails() {
        let mut l = ledger();
        let err = l.transfer(deployer(), 101 * ONE, other()).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientBalance);
        assert_eq!(err.to_string(), "insufficient balance");
        assert_eq!(l.balance_of(&deployer()), 100 * ONE);
    }

    #[test]
    fn self_transfer_keeps_balance() {
        let mut l = ledger();
        l.transfer(deployer(), ONE, deployer()).unwrap();
        assert_eq!(l.balance_of(&deployer()), 100 * ONE);
        assert_eq!(l.sum_of_balances(), l.total_supply());
    }

    #[test]
    fn approve_emits_spender_and_amount() {
        let mut l = ledger();
        l.drain_events();
        l.approve(deployer(), other(), 10 * ONE);
        assert_eq!(l.allowance(&deployer(), &other()), 10 * ONE);
        assert_eq!(
            l.drain_events(),
            vec![LedgerEvent::Approval {
                spender: other(),
                amount: 10 * ONE,
            }]
        );
    }

    #[test]
    fn approve_is_an_absolute_set() {
        let mut l = ledger();
        l.approve(deployer(), other(), 10 * ONE);
        l.approve(deployer(), other(), 3 * ONE);
        assert_eq!(l.allowance(&deployer(), &other()), 3 * ONE);
    }

    #[test]
    fn transfer_from_without_allowance_fails_with_typo() {
        let mut l = ledger();
        let err = l
            .transfer_from(other(), deployer(), other(), ONE)
            .unwrap_err();
        assert_eq!(err, LedgerError::InsufficientAllowance);
        assert_eq!(err.to_string(), "insufficient allownce");
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let mut l = ledger();
        l.approve(deployer(), other(), 10 * ONE);
        l.transfer_from(other(), deployer(), other(), 5 * ONE).unwrap();
        assert_eq!(l.balance_of(&other()), 5 * ONE);
        assert_eq!(l.balance_of(&deployer()), 95 * ONE);
        assert_eq!(l.allowance(&deployer(), &other()), 5 * ONE);
    }

    #[test]
    fn transfer_from_checks_balance_after_allowance() {
        let mut l = ledger();
        l.approve(other(), deployer(), 10 * ONE);
        let err = l
            .transfer_from(deployer(), other(), deployer(), ONE)
            .unwrap_err();
        assert_eq!(err, LedgerError::InsufficientBalance);
        // A failed spend leaves the allowance alone.
        assert_eq!(l.allowance(&other(), &deployer()), 10 * ONE);
    }

    #[test]
    fn mint_requires_manager() {
        let mut l = ledger();
        assert_eq!(
            l.mint(deployer(), deployer(), ONE),
            Err(LedgerError::Unauthorized)
        );

        let bank = Address::from_label("bank");
        l.set_manager(deployer(), bank).unwrap();
        assert_eq!(
            l.mint(deployer(), deployer(), ONE),
            Err(LedgerError::Unauthorized)
        );

        l.mint(bank, other(), 7 * ONE).unwrap();
        assert_eq!(l.balance_of(&other()), 7 * ONE);
        assert_eq!(l.total_supply(), 107 * ONE);
        assert_eq!(l.sum_of_balances(), l.total_supply());
    }

    #[test]
    fn manager_is_assigned_once_by_owner() {
        let mut l = ledger();
        let bank = Address::from_label("bank");
        assert_eq!(l.set_manager(other(), bank), Err(LedgerError::NotOwner));
        assert_eq!(
            l.set_manager(deployer(), Address::ZERO),
            Err(LedgerError::ZeroAddress)
        );
        l.set_manager(deployer(), bank).unwrap();
        assert_eq!(
            l.set_manager(deployer(), other()),
            Err(LedgerError::ManagerAlreadySet)
        );
        assert_eq!(l.manager(), Some(bank));
    }

    #[test]
    fn mint_overflow_leaves_state() {
        let mut l = ledger();
        let bank = Address::from_label("bank");
        l.set_manager(deployer(), bank).unwrap();
        assert_eq!(
            l.mint(bank, other(), Amount::MAX),
            Err(LedgerError::Overflow)
        );
        assert_eq!(l.total_supply(), 100 * ONE);
        assert_eq!(l.balance_of(&other()), 0);
    }
}
