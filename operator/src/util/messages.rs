/// User-friendly message for `status.conditions` while an [`account_types::Account`]
/// is being created (STS role assumption, IAM user build, region init).
pub const CREATING: &str = "Account is being provisioned.";

/// User-friendly message while an account is waiting on its support case
/// to clear the provider's default trial limits.
pub const PENDING_VERIFICATION: &str = "Waiting on support case to lift trial limits.";

/// User-friendly message once an account has completed initialization
/// and is eligible to be claimed (or is already bound to a claim).
pub const READY: &str = "Account is ready for use.";

/// User-friendly message when an account's reconciler has given up on
/// the current attempt and is waiting to be retried.
pub const FAILED: &str = "Account provisioning failed and will be retried.";

/// User-friendly message for an [`account_types::AccountClaim`] that has
/// not yet been bound to an account.
pub const PENDING_CLAIM: &str = "Waiting for an available account to bind.";

/// User-friendly message for a claim that is bound and has a live
/// credential secret.
pub const CLAIMED: &str = "Claim is bound to a ready account.";

/// User-friendly message for a claim whose bind or release failed.
pub const CLAIM_ERROR: &str = "Claim processing failed and will be retried.";

/// User-friendly message while a resource's deletion is pending
/// finalizer teardown.
pub const TERMINATING: &str = "Resource deletion is pending finalizer teardown.";
