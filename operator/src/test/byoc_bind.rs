//! Scenario: a BYOC claim with a populated secret ref mints its own
//! Account (`<claim>-<iamUserId>`), owner-referenced and mutually linked
//! to the claim, and on completion lands in `Ready` without ever opening
//! a support-tier verification case.

use account_types::AccountState;
use kube::ResourceExt;

use crate::accounts::actions::post_initialize_state;
use crate::accounts::AccountAction;
use crate::claims::actions::build_byoc_account;
use crate::claims::{bind_action, ClaimAction};

use super::fixtures::byoc_claim;

#[test]
fn an_unlinked_byoc_claim_binds_instead_of_searching_the_pool() {
    assert_eq!(bind_action(true), ClaimAction::BindByoc);
}

#[test]
fn the_minted_account_is_named_and_linked_after_the_claim() {
    let claim = byoc_claim("c1", "tenants", "111122223333");
    let account = build_byoc_account(
        &claim,
        "tenants",
        claim.spec.byoc_aws_account_id.clone().unwrap(),
        "abc123",
    );
    assert_eq!(account.metadata.name.as_deref(), Some("c1-abc123"));
    assert_eq!(
        account.metadata.owner_references.as_ref().unwrap()[0].name,
        claim.name_any()
    );
    assert_eq!(account.spec.claim_link.as_deref(), Some("c1"));
    assert!(account.spec.byoc);
}

#[test]
fn byoc_initialization_routes_to_initialize_byoc_not_create_pool_account() {
    use crate::accounts::initial_action;
    assert_eq!(initial_action(true, false), AccountAction::InitializeByoc);
}

#[test]
fn byoc_accounts_finish_initialization_ready_with_no_verification_case() {
    assert_eq!(post_initialize_state(true), AccountState::Ready);
}
