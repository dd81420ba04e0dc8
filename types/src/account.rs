use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{condition::Condition, legal_entity::LegalEntity};

/// Name of the label carrying the 6-character `iamUserId` suffix assigned
/// at creation time and used to uniquely name per-account IAM roles
/// across reuses. Immutable once set.
pub const IAM_USER_ID_LABEL: &str = "accounts.cloudtenant.io/iam-user-id";

/// Represents one tenant cloud account under this operator's management.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "accounts.cloudtenant.io",
    version = "v1alpha1",
    kind = "Account",
    plural = "accounts",
    derive = "PartialEq",
    status = "AccountStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.state\", \"name\": \"STATE\", \"type\": \"string\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.awsAccountId\", \"name\": \"AWS ACCOUNT\", \"type\": \"string\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".status.claimed\", \"name\": \"CLAIMED\", \"type\": \"boolean\"}")]
pub struct AccountSpec {
    /// Cloud-provider account id, assigned exactly once after creation
    /// and never cleared while the resource exists.
    #[serde(rename = "awsAccountId", skip_serializing_if = "Option::is_none")]
    pub aws_account_id: Option<String>,

    /// Name of the Secret holding the long-lived admin credentials for
    /// this account.
    #[serde(rename = "iamUserSecret", skip_serializing_if = "Option::is_none")]
    pub iam_user_secret: Option<String>,

    /// Name of the binding [`crate::AccountClaim`], set on bind.
    #[serde(rename = "claimLink", skip_serializing_if = "Option::is_none")]
    pub claim_link: Option<String>,

    /// Namespace of the binding [`crate::AccountClaim`], set on bind.
    #[serde(rename = "claimLinkNamespace", skip_serializing_if = "Option::is_none")]
    pub claim_link_namespace: Option<String>,

    /// Carried across reuses; once set, a reconciler must never clear it.
    #[serde(rename = "legalEntity", skip_serializing_if = "Option::is_none")]
    pub legal_entity: Option<LegalEntity>,

    /// True if this account was created for a "bring your own cloud"
    /// claim rather than born from the pool.
    #[serde(default)]
    pub byoc: bool,

    /// True if STS role assumption should be skipped in favor of the
    /// credentials already on file (manual STS mode for accounts whose
    /// federated role was set up out of band).
    #[serde(rename = "manualStsMode", default)]
    pub manual_sts_mode: bool,
}

/// Observed state of an [`Account`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AccountStatus {
    /// Current lifecycle state. Absent means the account has not yet
    /// been touched by the reconciler.
    pub state: Option<AccountState>,

    /// True while this account is held by a claim.
    #[serde(default)]
    pub claimed: bool,

    /// True once this account has been returned to the pool at least once.
    #[serde(default)]
    pub reused: bool,

    /// Id of the support case opened to lift the account out of the
    /// provider's default trial tier.
    #[serde(rename = "supportCaseId", skip_serializing_if = "Option::is_none")]
    pub support_case_id: Option<String>,

    /// Set by the credential watcher to request that the Account
    /// reconciler reissue the long-lived/STS credential secrets.
    #[serde(rename = "rotateCredentials", default)]
    pub rotate_credentials: bool,

    /// Same as `rotate_credentials`, but for the console sign-in URL.
    #[serde(rename = "rotateConsoleCredentials", default)]
    pub rotate_console_credentials: bool,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Lifecycle state of an [`Account`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum AccountState {
    Creating,
    PendingVerification,
    Ready,
    Failed,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountState::Creating => write!(f, "Creating"),
            AccountState::PendingVerification => write!(f, "PendingVerification"),
            AccountState::Ready => write!(f, "Ready"),
            AccountState::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for AccountState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" => Ok(AccountState::Creating),
            "PendingVerification" => Ok(AccountState::PendingVerification),
            "Ready" => Ok(AccountState::Ready),
            "Failed" => Ok(AccountState::Failed),
            _ => Err(()),
        }
    }
}

/// Condition type constants used on [`AccountStatus::conditions`].
pub mod condition_types {
    pub const CREATING: &str = "Creating";
    pub const PENDING_VERIFICATION: &str = "PendingVerification";
    pub const READY: &str = "Ready";
    pub const FAILED: &str = "Failed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_state_round_trips_through_str() {
        for state in [
            AccountState::Creating,
            AccountState::PendingVerification,
            AccountState::Ready,
            AccountState::Failed,
        ] {
            let parsed: AccountState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn legal_entity_empty_is_write_once_sentinel() {
        let empty = LegalEntity::default();
        assert!(empty.is_empty());
        let set = LegalEntity {
            id: "L1".to_owned(),
            name: "Acme".to_owned(),
        };
        assert!(!set.is_empty());
    }
}
