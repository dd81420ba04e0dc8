//! Scenario: an Account in `PendingVerification` whose support case comes
//! back resolved transitions to `Ready`.

use account_types::AccountState;

use crate::accounts::actions::apply_verification_resolved_status;
use crate::support::any_case_resolved;

#[test]
fn a_resolved_case_flips_the_account_to_ready() {
    let resolved_case = aws_sdk_support::types::CaseDetails::builder()
        .case_id("case-42")
        .status("resolved")
        .build();
    assert!(any_case_resolved(&[resolved_case]));

    let mut status = account_types::AccountStatus {
        state: Some(AccountState::PendingVerification),
        support_case_id: Some("case-42".to_owned()),
        ..Default::default()
    };
    apply_verification_resolved_status(&mut status);
    assert_eq!(status.state, Some(AccountState::Ready));
    let condition =
        account_types::find_condition(&status.conditions, account_types::condition_types::READY)
            .unwrap();
    assert_eq!(condition.reason.as_deref(), Some("CaseResolved"));
}

#[test]
fn an_open_case_is_not_reported_as_resolved() {
    let open_case = aws_sdk_support::types::CaseDetails::builder().status("opened").build();
    assert!(!any_case_resolved(&[open_case]));
}
