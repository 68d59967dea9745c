//! Integration tests for transaction execution: all-or-nothing semantics,
//! supply conservation across mixed workloads, and bootstrapping from a
//! deployment config.

use anyhow::Result;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use tinybank_contracts::bank::BankEvent;
use tinybank_contracts::runtime::{BankCall, BootstrapError, Call, Event, LedgerCall, Runtime};
use tinybank_protocol::config::{
    to_base_units, BankParams, ConfigError, DeploymentConfig, LedgerParams, MANAGER_QUORUM,
};
use tinybank_protocol::{Address, Amount};

const ONE: Amount = 1_000_000_000_000_000_000;

/// Generates a fresh key-derived account.
fn account() -> Address {
    let key = SigningKey::generate(&mut OsRng);
    Address::from_public_key(&key.verifying_key())
}

fn config(owner: Address, managers: [Address; MANAGER_QUORUM]) -> DeploymentConfig {
    DeploymentConfig {
        deployer: owner,
        ledger: LedgerParams::default(),
        bank: BankParams {
            owner,
            managers,
            reward_per_block: None,
        },
    }
}

/// Checks the ledger and bank invariants.
fn assert_consistent(rt: &Runtime) {
    let ledger = rt.ledger().unwrap();
    assert_eq!(ledger.sum_of_balances(), ledger.total_supply());
    if let Some(bank) = rt.bank() {
        assert!(bank.is_solvent(ledger));
    }
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn failed_stake_leaves_no_trace() -> Result<()> {
    let owner = account();
    let managers = std::array::from_fn(|_| account());
    let mut rt = Runtime::from_config(&config(owner, managers))?;
    let bank = rt.bank().unwrap().address();

    rt.submit(owner, LedgerCall::Approve { spender: bank, amount: ONE }.into())?;
    rt.submit(owner, BankCall::Stake { amount: ONE }.into())?;
    rt.advance_blocks(10)?;

    let height = rt.height();
    let receipts = rt.receipts().len();
    let supply = rt.ledger().unwrap().total_supply();
    let checkpoint = rt.bank().unwrap().last_accrual_height(&owner);

    // Reward settlement would succeed, but the allowance is spent, so the
    // custody pull fails and the whole call must unwind, mint included.
    let err = rt
        .submit(owner, BankCall::Stake { amount: ONE }.into())
        .unwrap_err();
    assert_eq!(err.reason(), "insufficient allownce");

    assert_eq!(rt.height(), height);
    assert_eq!(rt.receipts().len(), receipts);
    assert_eq!(rt.ledger().unwrap().total_supply(), supply);
    assert_eq!(rt.bank().unwrap().last_accrual_height(&owner), checkpoint);
    assert_eq!(rt.bank().unwrap().staked(&owner), ONE);
    assert_consistent(&rt);
    Ok(())
}

#[test]
fn reverted_call_discards_buffered_events() -> Result<()> {
    let owner = account();
    let managers: [Address; MANAGER_QUORUM] = std::array::from_fn(|_| account());
    let mut rt = Runtime::from_config(&config(owner, managers))?;
    let bank = rt.bank().unwrap().address();

    rt.submit(owner, LedgerCall::Approve { spender: bank, amount: ONE }.into())?;
    rt.submit(owner, BankCall::Stake { amount: ONE }.into())?;
    assert!(rt
        .submit(owner, BankCall::Stake { amount: ONE }.into())
        .is_err());

    // The next receipt must only contain its own events.
    let receipt = rt.submit(managers[0], BankCall::Confirm.into())?;
    assert_eq!(
        receipt.events,
        vec![Event::Bank(BankEvent::Confirmed {
            manager: managers[0],
            confirmations: 1,
        })]
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Conservation
// ---------------------------------------------------------------------------

#[test]
fn supply_is_conserved_across_mixed_workload() -> Result<()> {
    let owner = account();
    let managers: [Address; MANAGER_QUORUM] = std::array::from_fn(|_| account());
    let users: Vec<Address> = (0..4).map(|_| account()).collect();
    let mut rt = Runtime::from_config(&config(owner, managers))?;
    let bank = rt.bank().unwrap().address();

    for (i, user) in users.iter().enumerate() {
        let amount = ONE * (i as Amount + 1);
        rt.submit(owner, LedgerCall::Transfer { amount, to: *user }.into())?;
        rt.submit(*user, LedgerCall::Approve { spender: bank, amount }.into())?;
        rt.submit(*user, BankCall::Stake { amount }.into())?;
        assert_consistent(&rt);
    }

    // Some of these fail; failures must not disturb the invariants either.
    let calls: Vec<(Address, Call)> = vec![
        (users[0], BankCall::Withdraw { amount: ONE }.into()),
        (users[1], BankCall::Withdraw { amount: 10 * ONE }.into()),
        (users[2], LedgerCall::Transfer { amount: ONE, to: users[3] }.into()),
        (
            users[3],
            LedgerCall::TransferFrom {
                from: owner,
                to: users[3],
                amount: ONE,
            }
            .into(),
        ),
        (owner, LedgerCall::Mint { to: owner, amount: ONE }.into()),
        (users[3], BankCall::Withdraw { amount: 4 * ONE }.into()),
    ];
    for (sender, call) in calls {
        let _ = rt.submit(sender, call);
        assert_consistent(&rt);
    }

    let staked: Amount = users.iter().map(|u| rt.bank().unwrap().staked(u)).sum();
    assert_eq!(staked, rt.bank().unwrap().total_staked());
    Ok(())
}

#[test]
fn allowance_drops_by_exactly_the_spent_amount() -> Result<()> {
    let owner = account();
    let spender = account();
    let mut rt = Runtime::new();
    rt.deploy_ledger(owner, LedgerParams::default())?;

    rt.submit(owner, LedgerCall::Approve { spender, amount: 10 * ONE }.into())?;
    for step in 1..=4u128 {
        rt.submit(
            spender,
            LedgerCall::TransferFrom {
                from: owner,
                to: spender,
                amount: 2 * ONE,
            }
            .into(),
        )?;
        assert_eq!(
            rt.ledger().unwrap().allowance(&owner, &spender),
            10 * ONE - step * 2 * ONE
        );
    }
    assert!(rt
        .submit(
            spender,
            LedgerCall::TransferFrom {
                from: owner,
                to: spender,
                amount: 3 * ONE,
            }
            .into(),
        )
        .is_err());
    assert_eq!(rt.ledger().unwrap().allowance(&owner, &spender), 2 * ONE);
    Ok(())
}

// ---------------------------------------------------------------------------
// Bootstrapping
// ---------------------------------------------------------------------------

#[test]
fn bootstrap_from_json_config() -> Result<()> {
    let owner = Address::from_label("owner");
    let managers = std::array::from_fn(|i| Address::from_label(&format!("m{}", i)));
    let json = config(owner, managers).to_json()?;

    let parsed = DeploymentConfig::from_json(&json)?;
    let rt = Runtime::from_config(&parsed)?;
    assert_eq!(rt.height(), 3);
    assert_eq!(
        rt.ledger().unwrap().balance_of(&owner),
        to_base_units(100, 18).unwrap()
    );
    assert_eq!(rt.bank().unwrap().managers(), &managers);
    Ok(())
}

#[test]
fn bootstrap_rejects_invalid_config() {
    let owner = Address::from_label("owner");
    let mut managers: [Address; MANAGER_QUORUM] =
        std::array::from_fn(|i| Address::from_label(&format!("m{}", i)));
    managers[2] = managers[1];

    let err = Runtime::from_config(&config(owner, managers)).unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Config(ConfigError::DuplicateManager(_))
    ));
}
