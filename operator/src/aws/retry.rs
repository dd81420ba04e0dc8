//! Classified retry wrapper for AWS SDK calls.
//!
//! Every external call elsewhere in the operator should be wrapped with
//! [`with_retry`] rather than reaching for the SDK's own retry config,
//! because the classification set here is a deliberately narrow policy
//! decision, not a generic network-failure policy.

use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Default retry policy: initial delay 3s, exponential backoff, max 5
/// attempts.
pub const INITIAL_DELAY: Duration = Duration::from_secs(3);
pub const MAX_ATTEMPTS: u32 = 5;

/// AWS error codes that are considered transient and worth retrying.
/// Everything else is returned to the caller immediately.
const RETRYABLE_CODES: &[&str] = &[
    "ServiceFailure",
    "InvalidClientTokenId",
    "AccessDenied",
    "TooManyRequestsException",
    "UnrecognizedClientException",
];

/// Returns true if the given AWS error code (as reported by
/// `aws_sdk_*::error::ProvideErrorMetadata::code()`) belongs to the
/// retryable set.
pub fn is_retryable_code(code: Option<&str>) -> bool {
    matches!(code, Some(c) if RETRYABLE_CODES.contains(&c))
}

/// Retries `op` under the classified policy above. `code_of` extracts an
/// AWS error code from the op's error type so the same wrapper works
/// across every service client (each has a distinct error enum).
pub async fn with_retry<T, E, Fut, F, C>(mut op: F, code_of: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: Fn(&E) -> Option<String>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let code = code_of(&err);
                if attempt >= MAX_ATTEMPTS || !is_retryable_code(code.as_deref()) {
                    return Err(err);
                }
                warn!(attempt, ?code, "retrying transient AWS error");
                sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_transient_codes() {
        assert!(is_retryable_code(Some("TooManyRequestsException")));
        assert!(is_retryable_code(Some("AccessDenied")));
        assert!(!is_retryable_code(Some("NoSuchEntity")));
        assert!(!is_retryable_code(None));
    }

    #[tokio::test]
    async fn stops_after_max_attempts_on_retryable_error() {
        let mut attempts = 0;
        let result: Result<(), &str> = with_retry(
            || {
                attempts += 1;
                async { Err("ServiceFailure") }
            },
            |e| Some((*e).to_owned()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn returns_immediately_on_non_retryable_error() {
        let mut attempts = 0;
        let result: Result<(), &str> = with_retry(
            || {
                attempts += 1;
                async { Err("NoSuchEntity") }
            },
            |e| Some((*e).to_owned()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
