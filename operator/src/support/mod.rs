//! Support-case gateway: lifts a newly-created account
//! out of the provider's default trial tier via a verification case.

use crate::aws::retry::with_retry;
use crate::aws::ClientSet;
use crate::util::Error;
use aws_sdk_support::error::ProvideErrorMetadata;
use std::time::Duration;

const CASE_SUBJECT: &str = "Add account to Enterprise Support";
const CASE_CATEGORY_CODE: &str = "other-account-issues";
const CASE_SERVICE_CODE: &str = "customer-account";
const CASE_ISSUE_TYPE: &str = "customer-service";
const CASE_LANGUAGE: &str = "en";
const CASE_BODY: &str =
    "Please add this newly-created account to our Enterprise Support agreement.";

/// Status value that indicates the case has been closed in the
/// requester's favor.
pub const RESOLVED_STATUS: &str = "resolved";

/// Creates the verification case for the given account id, returning the
/// provider's case id to be stored on `Account.status.supportCaseId`.
pub async fn create_case(clients: &ClientSet, aws_account_id: &str) -> Result<String, Error> {
    let result = with_retry(
        || {
            clients
                .support
                .create_case()
                .subject(format!("{CASE_SUBJECT}: {aws_account_id}"))
                .category_code(CASE_CATEGORY_CODE)
                .service_code(CASE_SERVICE_CODE)
                .issue_type(CASE_ISSUE_TYPE)
                .language(CASE_LANGUAGE)
                .communication_body(CASE_BODY)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await;

    match result {
        Ok(output) => output
            .case_id
            .ok_or_else(|| Error::UserInputError("CreateCase returned no caseId".to_owned())),
        Err(err) if err.code() == Some("CaseCreationLimitExceeded") => {
            Err(Error::CaseCreationLimitExceeded)
        }
        Err(err) => Err(Error::aws(err)),
    }
}

/// Polls a previously-created case and returns true if it has resolved.
pub async fn is_resolved(clients: &ClientSet, case_id: &str) -> Result<bool, Error> {
    let output = with_retry(
        || clients.support.describe_cases().case_id_list(case_id).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    Ok(any_case_resolved(output.cases()))
}

/// True if any case in a `DescribeCases` response has closed in the
/// requester's favor.
pub(crate) fn any_case_resolved(cases: &[aws_sdk_support::types::CaseDetails]) -> bool {
    cases.iter().any(|case| case.status() == Some(RESOLVED_STATUS))
}

/// Requeue delay between case creation and the first poll: `30 + (awsAccountId
/// mod 30)` seconds, decorrelating a large pool's polling.
pub fn first_poll_delay(aws_account_id: &str) -> Duration {
    let numeric: u64 = aws_account_id
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    Duration::from_secs(30 + (numeric % 30))
}

/// Requeue delay between subsequent polls once verification is underway.
pub const SUBSEQUENT_POLL_DELAY: Duration = Duration::from_secs(600);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_delay_is_decorrelated_by_account_id() {
        assert_eq!(first_poll_delay("30"), Duration::from_secs(30));
        assert_eq!(first_poll_delay("31"), Duration::from_secs(31));
        assert_eq!(first_poll_delay("60"), Duration::from_secs(30));
        assert_eq!(first_poll_delay("0"), Duration::from_secs(30));
    }

    #[test]
    fn any_case_resolved_requires_resolved_status() {
        let resolved = aws_sdk_support::types::CaseDetails::builder()
            .status(RESOLVED_STATUS)
            .build();
        let pending = aws_sdk_support::types::CaseDetails::builder()
            .status("opened")
            .build();
        assert!(any_case_resolved(&[pending.clone(), resolved]));
        assert!(!any_case_resolved(&[pending]));
    }
}
