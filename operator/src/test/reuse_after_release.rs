//! Scenario: releasing a pool-born claim scrubs its bound Account and
//! returns it to the pool still carrying its legal entity, unclaimed and
//! flagged for credential rotation.

use account_types::AccountState;

use crate::claims::actions::{apply_release_status, legal_entity_carry_over};
use crate::claims::{release_action, ClaimAction};

use super::fixtures::{legal_entity, test_account, test_claim, with_legal_entity};

#[test]
fn releasing_a_pool_born_claim_scrubs_rather_than_deletes() {
    assert_eq!(release_action(false), ClaimAction::ReleasePool);
}

#[test]
fn the_accounts_legal_entity_survives_the_release() {
    let account = with_legal_entity(test_account("a1", "accounts"), "L");
    let claim = test_claim("c2", "tenants");
    assert_eq!(legal_entity_carry_over(&account, &claim), Some(legal_entity("L")));
}

#[test]
fn released_status_is_unclaimed_reused_and_due_for_rotation() {
    let mut status = account_types::AccountStatus {
        claimed: true,
        state: Some(AccountState::Ready),
        ..Default::default()
    };
    apply_release_status(&mut status);
    assert!(!status.claimed);
    assert!(status.reused);
    assert!(status.rotate_credentials);
    assert_eq!(status.state, Some(AccountState::Ready));
}
