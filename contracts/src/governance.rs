//! # Governance Gate
//!
//! A unanimous-confirmation gate over a fixed set of five managers. A
//! protected mutation only runs once every manager has confirmed since the
//! last mutation (or since deployment), and running it clears the
//! confirmations in the same step.
//!
//! ```text
//!   Empty ──confirm──▶ Partial(1..=4) ──confirm──▶ Full ──execute──▶ Empty
//! ```
//!
//! Confirmations are a bitmap indexed by manager position, so the set can
//! neither grow past the quorum nor hold anyone who is not a manager.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tinybank_protocol::config::MANAGER_QUORUM;
use tinybank_protocol::Address;

/// Bitmap with one bit set per manager.
const ALL_CONFIRMED: u8 = (1u8 << MANAGER_QUORUM) - 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the governance gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    /// `confirm()` called by an address outside the manager set.
    #[error("You are not one of managers")]
    NotAManager,

    /// A protected mutation was attempted before all managers confirmed.
    #[error("Not all managers confirmed yet")]
    QuorumNotMet,

    /// The manager set contains a zero or duplicated address.
    #[error("managers must be five distinct non-zero addresses")]
    InvalidManagers,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the gate is in its confirmation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateState {
    /// Nobody has confirmed.
    Empty,
    /// Some, but not all, managers have confirmed.
    Partial(usize),
    /// Every manager has confirmed; the next protected mutation may run.
    Full,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Empty => write!(f, "Empty"),
            GateState::Partial(n) => write!(f, "Partial({}/{})", n, MANAGER_QUORUM),
            GateState::Full => write!(f, "Full"),
        }
    }
}

/// The confirmation gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceGate {
    /// The quorum, fixed at construction.
    managers: [Address; MANAGER_QUORUM],
    /// Bit `i` is set once `managers[i]` has confirmed.
    confirmed: u8,
}

impl GovernanceGate {
    /// Builds a gate over exactly five distinct, non-zero managers.
    pub fn new(managers: [Address; MANAGER_QUORUM]) -> Result<Self, GovernanceError> {
        for (i, manager) in managers.iter().enumerate() {
            if manager.is_zero() || managers[..i].contains(manager) {
                return Err(GovernanceError::InvalidManagers);
            }
        }
        Ok(Self {
            managers,
            confirmed: 0,
        })
    }

    /// Records `caller`'s confirmation. Returns `true` if it was new;
    /// confirming twice in the same cycle is a no-op.
    pub fn confirm(&mut self, caller: &Address) -> Result<bool, GovernanceError> {
        let index = self
            .manager_index(caller)
            .ok_or(GovernanceError::NotAManager)?;
        let bit = 1u8 << index;
        let fresh = self.confirmed & bit == 0;
        self.confirmed |= bit;
        Ok(fresh)
    }

    /// Runs `mutation` if every manager has confirmed, then resets the gate.
    ///
    /// The reset happens in the same call as the mutation, so there is no
    /// state in which the mutation has run but the confirmations survive.
    pub fn execute<T>(&mut self, mutation: impl FnOnce() -> T) -> Result<T, GovernanceError> {
        if !self.is_full() {
            return Err(GovernanceError::QuorumNotMet);
        }
        let out = mutation();
        self.confirmed = 0;
        Ok(out)
    }

    /// Position of `address` in the manager set.
    pub fn manager_index(&self, address: &Address) -> Option<usize> {
        self.managers.iter().position(|m| m == address)
    }

    /// Whether `address` is one of the managers.
    pub fn is_manager(&self, address: &Address) -> bool {
        self.manager_index(address).is_some()
    }

    /// Whether `address` has confirmed in the current cycle.
    pub fn has_confirmed(&self, address: &Address) -> bool {
        self.manager_index(address)
            .map(|i| self.confirmed & (1u8 << i) != 0)
            .unwrap_or(false)
    }

    /// Number of managers that have confirmed in the current cycle.
    pub fn confirmations(&self) -> usize {
        self.confirmed.count_ones() as usize
    }

    /// `true` once every manager has confirmed.
    pub fn is_full(&self) -> bool {
        self.confirmed == ALL_CONFIRMED
    }

    /// Current cycle state.
    pub fn state(&self) -> GateState {
        match self.confirmations() {
            0 => GateState::Empty,
            n if n == MANAGER_QUORUM => GateState::Full,
            n => GateState::Partial(n),
        }
    }

    /// The manager set.
    pub fn managers(&self) -> &[Address; MANAGER_QUORUM] {
        &self.managers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managers() -> [Address; MANAGER_QUORUM] {
        std::array::from_fn(|i| Address::from_label(&format!("manager-{}", i + 1)))
    }

    #[test]
    fn rejects_duplicate_and_zero_managers() {
        let mut dup = managers();
        dup[3] = dup[1];
        assert_eq!(
            GovernanceGate::new(dup),
            Err(GovernanceError::InvalidManagers)
        );

        let mut zero = managers();
        zero[0] = Address::ZERO;
        assert_eq!(
            GovernanceGate::new(zero),
            Err(GovernanceError::InvalidManagers)
        );
    }

    #[test]
    fn outsider_cannot_confirm() {
        let mut gate = GovernanceGate::new(managers()).unwrap();
        let err = gate.confirm(&Address::from_label("outsider")).unwrap_err();
        assert_eq!(err, GovernanceError::NotAManager);
        assert_eq!(err.to_string(), "You are not one of managers");
        assert_eq!(gate.state(), GateState::Empty);
    }

    #[test]
    fn reconfirming_does_not_double_count() {
        let mut gate = GovernanceGate::new(managers()).unwrap();
        let m = managers();
        assert!(gate.confirm(&m[0]).unwrap());
        assert!(!gate.confirm(&m[0]).unwrap());
        assert_eq!(gate.confirmations(), 1);
        assert_eq!(gate.state(), GateState::Partial(1));
        assert!(gate.has_confirmed(&m[0]));
        assert!(!gate.has_confirmed(&m[1]));
    }

    #[test]
    fn every_proper_subset_is_rejected() {
        let m = managers();
        for mask in 0u8..ALL_CONFIRMED {
            let mut gate = GovernanceGate::new(m).unwrap();
            for (i, manager) in m.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    gate.confirm(manager).unwrap();
                }
            }
            let mut ran = false;
            assert_eq!(
                gate.execute(|| ran = true),
                Err(GovernanceError::QuorumNotMet),
                "subset {:05b} must not pass",
                mask
            );
            assert!(!ran);
            assert_eq!(gate.confirmations(), mask.count_ones() as usize);
        }
    }

    #[test]
    fn full_quorum_executes_once_then_resets() {
        let m = managers();
        let mut gate = GovernanceGate::new(m).unwrap();
        for manager in &m {
            gate.confirm(manager).unwrap();
        }
        assert_eq!(gate.state(), GateState::Full);

        assert_eq!(gate.execute(|| 42), Ok(42));
        assert_eq!(gate.state(), GateState::Empty);
        assert_eq!(gate.execute(|| 43), Err(GovernanceError::QuorumNotMet));
    }

    #[test]
    fn state_display() {
        assert_eq!(GateState::Partial(4).to_string(), "Partial(4/5)");
        assert_eq!(GateState::Full.to_string(), "Full");
    }
}
