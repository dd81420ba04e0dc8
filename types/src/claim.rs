use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{condition::Condition, legal_entity::LegalEntity};

/// Represents one request for a tenant account.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "accounts.cloudtenant.io",
    version = "v1alpha1",
    kind = "AccountClaim",
    plural = "accountclaims",
    derive = "PartialEq",
    status = "AccountClaimStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.state\", \"name\": \"STATE\", \"type\": \"string\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.accountLink\", \"name\": \"ACCOUNT\", \"type\": \"string\"}")]
pub struct AccountClaimSpec {
    pub legal_entity: LegalEntity,

    /// Name of the bound [`crate::Account`], populated on bind.
    #[serde(rename = "accountLink", skip_serializing_if = "Option::is_none")]
    pub account_link: Option<String>,

    /// Namespace of the bound [`crate::Account`]. Accounts all live in
    /// the operator's own namespace, but this is carried explicitly so
    /// the bind protocol never has to assume that placement.
    #[serde(rename = "accountLinkNamespace", skip_serializing_if = "Option::is_none")]
    pub account_link_namespace: Option<String>,

    pub aws: AwsClaimSpec,

    /// True for a "bring your own cloud" claim: the tenant already owns
    /// the account and only needs access-delegation scaffolding.
    #[serde(default)]
    pub byoc: bool,

    /// Pre-existing cloud account id for a BYOC claim. Required when
    /// `byoc` is true.
    #[serde(rename = "byocAwsAccountId", skip_serializing_if = "Option::is_none")]
    pub byoc_aws_account_id: Option<String>,

    /// Reference to pre-existing credentials for a BYOC claim. Required
    /// when `byoc` is true.
    #[serde(rename = "byocSecretRef", skip_serializing_if = "Option::is_none")]
    pub byoc_secret_ref: Option<SecretRef>,

    /// Name of the Secret this operator should materialize with the
    /// bound account's credentials, for the consuming workflow to read.
    #[serde(rename = "awsCredentialSecret", skip_serializing_if = "Option::is_none")]
    pub aws_credential_secret: Option<SecretRef>,
}

/// AWS-specific portion of an [`AccountClaimSpec`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AwsClaimSpec {
    /// Regions the claimed account must be initialized in. Must
    /// contain at least one entry.
    pub regions: Vec<String>,
}

/// A reference to a Secret resource, optionally in another namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SecretRef {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretRef {
    pub fn is_populated(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Observed state of an [`AccountClaim`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AccountClaimStatus {
    pub state: Option<AccountClaimState>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Lifecycle state of an [`AccountClaim`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum AccountClaimState {
    PendingClaim,
    Claimed,
    Error,
}

impl fmt::Display for AccountClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountClaimState::PendingClaim => write!(f, "PendingClaim"),
            AccountClaimState::Claimed => write!(f, "Claimed"),
            AccountClaimState::Error => write!(f, "Error"),
        }
    }
}

impl FromStr for AccountClaimState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingClaim" => Ok(AccountClaimState::PendingClaim),
            "Claimed" => Ok(AccountClaimState::Claimed),
            "Error" => Ok(AccountClaimState::Error),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byoc_claim_requires_account_id_and_secret_ref() {
        let mut claim = AccountClaimSpec {
            byoc: true,
            ..Default::default()
        };
        assert!(claim.byoc_aws_account_id.is_none());
        assert!(claim.byoc_secret_ref.is_none());

        claim.byoc_aws_account_id = Some("111122223333".to_owned());
        claim.byoc_secret_ref = Some(SecretRef {
            name: "byoc-creds".to_owned(),
            namespace: None,
        });
        assert!(claim.byoc_secret_ref.as_ref().unwrap().is_populated());
    }
}
