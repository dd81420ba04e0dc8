//! Scenario: a brand-new pool with `poolSize=1` and no Accounts creates
//! exactly one Account, and that Account's existence alone accounts for
//! the pool's first inventory snapshot.

use crate::pool::{compute_inventory, needs_new_account};
use account_types::AccountState;

use super::fixtures::{test_account, with_state};

#[test]
fn empty_pool_needs_exactly_one_account() {
    let inventory = compute_inventory(&[]);
    assert!(needs_new_account(&inventory, 1, 0, 10));
}

#[test]
fn one_creating_account_satisfies_the_first_inventory_snapshot() {
    let created = with_state(test_account("pool-abc123", "accounts"), AccountState::Creating);
    let inventory = compute_inventory(&[created]);
    assert_eq!(inventory.unclaimed, 1);
    assert_eq!(inventory.available, 0);
    assert_eq!(inventory.progressing, 1);
    assert_eq!(inventory.claimed, 0);
}

#[test]
fn a_ready_unclaimed_account_satisfies_the_pool_and_stops_growth() {
    let ready = with_state(test_account("pool-abc123", "accounts"), AccountState::Ready);
    let inventory = compute_inventory(&[ready]);
    assert_eq!(inventory.available, 1);
    assert!(!needs_new_account(&inventory, 1, 1, 10));
}
