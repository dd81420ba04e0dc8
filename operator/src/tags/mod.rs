//! Deterministic tagging and email-derivation policy. Every cloud resource
//! this operator creates is tagged through [`TagSet::build`] so that the
//! reuse scrubber can scope deletion by the exact same quartet.

use account_types::Account;
use aws_sdk_ec2::types::Tag as Ec2Tag;
use aws_sdk_iam::types::Tag as IamTag;

/// Tag key carrying the Account resource's name.
pub const CLUSTER_ACCOUNT_NAME: &str = "clusterAccountName";
/// Tag key carrying the Account resource's namespace.
pub const CLUSTER_NAMESPACE: &str = "clusterNamespace";
/// Tag key carrying the bound Claim's name, empty when unclaimed.
pub const CLUSTER_CLAIM_LINK: &str = "clusterClaimLink";
/// Tag key carrying the bound Claim's namespace, empty when unclaimed.
pub const CLUSTER_CLAIM_LINK_NAMESPACE: &str = "clusterClaimLinkNamespace";
/// Tag key used for the owner shard assigned by configuration.
pub const OWNER: &str = "owner";

/// The tag quartet (plus `Name`) applied to every created resource,
/// derived once from an [`Account`] so every caller agrees on the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub account_name: String,
    pub namespace: String,
    pub claim_link: String,
    pub claim_link_namespace: String,
    pub name: String,
}

impl TagSet {
    /// Builds the tag set for the given [`Account`] and a resource-specific
    /// display name, e.g. `"sentinel-us-east-1"`.
    pub fn build(account: &Account, resource_name: impl Into<String>) -> Self {
        let namespace = account.metadata.namespace.clone().unwrap_or_default();
        TagSet {
            account_name: account.metadata.name.clone().unwrap_or_default(),
            namespace,
            claim_link: account.spec.claim_link.clone().unwrap_or_default(),
            claim_link_namespace: account.spec.claim_link_namespace.clone().unwrap_or_default(),
            name: resource_name.into(),
        }
    }

    pub fn as_pairs(&self) -> [(&'static str, &str); 5] {
        [
            (CLUSTER_ACCOUNT_NAME, &self.account_name),
            (CLUSTER_NAMESPACE, &self.namespace),
            (CLUSTER_CLAIM_LINK, &self.claim_link),
            (CLUSTER_CLAIM_LINK_NAMESPACE, &self.claim_link_namespace),
            ("Name", &self.name),
        ]
    }

    pub fn to_ec2_tags(&self) -> Vec<Ec2Tag> {
        self.as_pairs()
            .into_iter()
            .map(|(k, v)| Ec2Tag::builder().key(k).value(v).build())
            .collect()
    }

    pub fn to_iam_tags(&self) -> Vec<IamTag> {
        self.as_pairs()
            .into_iter()
            .map(|(k, v)| IamTag::builder().key(k).value(v).build().unwrap())
            .collect()
    }

    /// Returns true if a resource's tag map matches this Account's
    /// `(clusterAccountName, clusterNamespace)` pair, the filter the
    /// teardown/scrub routines scope deletion by.
    pub fn matches_account(
        account_name: &str,
        namespace: &str,
        tags: &std::collections::HashMap<String, String>,
    ) -> bool {
        tags.get(CLUSTER_ACCOUNT_NAME).map(String::as_str) == Some(account_name)
            && tags.get(CLUSTER_NAMESPACE).map(String::as_str) == Some(namespace)
    }
}

/// Derives the admin email used for `CreateAccount`, of the form
/// `<prefix>+<suffix>@<domain>` where `suffix` is the last hyphen-segment
/// of the Account resource's name.
pub fn derive_account_email(account_name: &str, email_prefix: &str, email_domain: &str) -> String {
    let suffix = account_name.rsplit('-').next().unwrap_or(account_name);
    format!("{email_prefix}+{suffix}@{email_domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_email_from_last_hyphen_segment() {
        let email = derive_account_email("pool-account-a1b2c3", "aws-admin", "example.com");
        assert_eq!(email, "aws-admin+a1b2c3@example.com");
    }

    #[test]
    fn tag_set_carries_empty_claim_link_when_unclaimed() {
        let account = Account {
            metadata: kube::api::ObjectMeta {
                name: Some("acct-1".to_owned()),
                namespace: Some("accounts".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let tags = TagSet::build(&account, "sentinel-us-east-1");
        assert_eq!(tags.claim_link, "");
        assert_eq!(tags.account_name, "acct-1");
    }
}
