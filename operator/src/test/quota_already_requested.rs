//! Scenario: a region with a prior in-flight quota-increase request for
//! the same desired value does not get a duplicate request; the
//! dedup check is the same as what `request_quota_increase_if_needed`
//! scans quota-change history for.

use crate::region_init::matches_desired_value;

#[test]
fn a_prior_request_for_the_same_value_is_treated_as_a_match() {
    let change = aws_sdk_servicequotas::types::RequestedServiceQuotaChange::builder()
        .desired_value(256.0)
        .build();
    assert!(matches_desired_value(&change, 256.0));
}

#[test]
fn a_prior_request_for_a_different_value_is_not_a_match() {
    let change = aws_sdk_servicequotas::types::RequestedServiceQuotaChange::builder()
        .desired_value(128.0)
        .build();
    assert!(!matches_desired_value(&change, 256.0));
}
