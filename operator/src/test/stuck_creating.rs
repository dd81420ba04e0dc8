//! Scenario: an Account stuck in `Creating` past the stuck-creating
//! timeout is marked `Failed` on the next reconcile; it is left alone
//! right up to the boundary.

use account_types::AccountState;

use crate::accounts::actions::{apply_failed_status, is_stuck_creating, STUCK_CREATING_TIMEOUT};

use super::fixtures::with_creating_condition_probed;

#[test]
fn not_stuck_one_second_before_the_timeout() {
    let account = with_creating_condition_probed(
        super::fixtures::test_account("a1", "accounts"),
        STUCK_CREATING_TIMEOUT - chrono::Duration::seconds(1),
    );
    assert!(!is_stuck_creating(&account));
}

#[test]
fn stuck_one_second_past_the_timeout() {
    let account = with_creating_condition_probed(
        super::fixtures::test_account("a1", "accounts"),
        STUCK_CREATING_TIMEOUT + chrono::Duration::seconds(1),
    );
    assert!(is_stuck_creating(&account));
}

#[test]
fn a_stuck_account_is_marked_failed() {
    let mut status =
        account_types::AccountStatus { state: Some(AccountState::Creating), ..Default::default() };
    apply_failed_status(&mut status, "stuck in Creating past the timeout");
    assert_eq!(status.state, Some(AccountState::Failed));
}
