//! # TinyBank Contracts
//!
//! The two contracts of a TinyBank deployment and the runtime that executes
//! them:
//!
//! - **Ledger**: fungible balances and allowances with a single privileged
//!   minter.
//! - **Bank**: custodies staked ledger tokens and mints a flat per-block
//!   reward to every staker.
//! - **Governance**: the five-manager unanimous gate in front of the bank's
//!   reward rate.
//! - **Runtime**: mines one block per transaction and reverts failed
//!   transactions without a trace.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow with `checked_add` /
//!    `checked_sub`; amounts are `u128` base units, never floats.
//! 2. State transitions are explicit: enum variants, not boolean flags.
//! 3. Every privileged operation checks the acting address against a stored
//!    role before touching state.
//! 4. Every public type is serializable (serde) for receipts and snapshots.

pub mod bank;
pub mod governance;
pub mod ledger;
pub mod runtime;

pub use bank::{Bank, BankError, BankEvent, CallContext, StakingToken};
pub use governance::{GateState, GovernanceError, GovernanceGate};
pub use ledger::{Ledger, LedgerError, LedgerEvent};
pub use runtime::{BankCall, Call, ExecutionError, LedgerCall, Receipt, Runtime};
