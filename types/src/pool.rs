use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Represents a sizing target: the number of ready, unclaimed accounts
/// this operator should keep on hand. Only one pool per
/// operator instance is expected.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "accounts.cloudtenant.io",
    version = "v1alpha1",
    kind = "AccountPool",
    plural = "accountpools",
    derive = "PartialEq",
    status = "AccountPoolStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.poolSize\", \"name\": \"SIZE\", \"type\": \"integer\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".status.availableAccounts\", \"name\": \"AVAILABLE\", \"type\": \"integer\"}")]
pub struct AccountPoolSpec {
    #[serde(rename = "poolSize")]
    pub pool_size: i32,
}

/// Observed inventory arithmetic for an [`AccountPool`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AccountPoolStatus {
    #[serde(rename = "poolSize", skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<i32>,

    #[serde(rename = "unclaimedAccounts", skip_serializing_if = "Option::is_none")]
    pub unclaimed_accounts: Option<i32>,

    #[serde(rename = "claimedAccounts", skip_serializing_if = "Option::is_none")]
    pub claimed_accounts: Option<i32>,

    #[serde(rename = "availableAccounts", skip_serializing_if = "Option::is_none")]
    pub available_accounts: Option<i32>,

    #[serde(rename = "accountsProgressing", skip_serializing_if = "Option::is_none")]
    pub accounts_progressing: Option<i32>,

    #[serde(rename = "awsLimitDelta", skip_serializing_if = "Option::is_none")]
    pub aws_limit_delta: Option<i32>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
