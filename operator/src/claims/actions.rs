use crate::accounts::actions::generate_iam_user_id;
use crate::iam;
use crate::scrub;
use crate::util::patch::patch_status;
use crate::util::{finalizer, Error};
use account_types::{Account, AccountClaim, AccountClaimState};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

/// Creates a BYOC Account named `<claim>-<iamUserId>`, owner-referenced to
/// the claim, with `claimLink` already pointed at the claim and the
/// finalizer/label present from birth so the Account reconciler's first
/// pass goes straight to BYOC initialization.
pub async fn bind_byoc(
    client: Client,
    claim: &AccountClaim,
    claim_namespace: &str,
) -> Result<Account, Error> {
    let byoc_account_id = claim
        .spec
        .byoc_aws_account_id
        .clone()
        .ok_or(Error::ByocAccountIdMissing)?;
    let secret_ref = claim
        .spec
        .byoc_secret_ref
        .clone()
        .ok_or(Error::ByocSecretRefMissing)?;
    if !secret_ref.is_populated() {
        return Err(Error::ByocSecretRefMissing);
    }

    let iam_user_id = generate_iam_user_id();
    let account = build_byoc_account(claim, claim_namespace, byoc_account_id, &iam_user_id);
    let accounts_api: Api<Account> = Api::namespaced(client, claim_namespace);
    accounts_api.create(&PostParams::default(), &account).await?;
    Ok(account)
}

/// Builds the BYOC Account resource named `<claim>-<iamUserId>`, owner-
/// referenced to the claim, with `claimLink` already pointed at the claim
/// and the finalizer/label present from birth. Deterministic given
/// `iam_user_id`, so it can be exercised without generating a real one.
pub(crate) fn build_byoc_account(
    claim: &AccountClaim,
    claim_namespace: &str,
    byoc_account_id: String,
    iam_user_id: &str,
) -> Account {
    let claim_name = claim.name_any();
    let account_name = format!("{claim_name}-{iam_user_id}");
    Account {
        metadata: kube::api::ObjectMeta {
            name: Some(account_name),
            namespace: Some(claim_namespace.to_owned()),
            owner_references: Some(vec![claim.controller_owner_ref(&()).unwrap()]),
            finalizers: Some(vec![finalizer::FINALIZER_NAME.to_owned()]),
            labels: Some(std::collections::BTreeMap::from([(
                account_types::IAM_USER_ID_LABEL.to_owned(),
                iam_user_id.to_owned(),
            )])),
            ..Default::default()
        },
        spec: account_types::AccountSpec {
            byoc: true,
            aws_account_id: Some(byoc_account_id),
            claim_link: Some(claim_name),
            claim_link_namespace: Some(claim_namespace.to_owned()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Sets `accountLink`/`accountLinkNamespace` on the claim.
pub async fn link_claim_to_account(
    client: Client,
    claim: &AccountClaim,
    account_name: &str,
    account_namespace: &str,
) -> Result<AccountClaim, Error> {
    let namespace = claim.namespace().unwrap_or_default();
    let api: Api<AccountClaim> = Api::namespaced(client, &namespace);
    let patch = Patch::Merge(serde_json::json!({
        "spec": {
            "accountLink": account_name,
            "accountLinkNamespace": account_namespace,
        }
    }));
    Ok(api
        .patch(&claim.name_any(), &PatchParams::apply(crate::util::MANAGER_NAME), &patch)
        .await?)
}

/// Enumerates Ready, unclaimed Accounts in `namespace`, preferring one
/// whose `legalEntity.id` matches the claim's (reuse) over an account
/// with an empty legal entity (fresh), name-sorted for determinism.
pub async fn find_candidate_account(
    client: Client,
    namespace: &str,
    claim_legal_entity_id: &str,
) -> Result<Option<Account>, Error> {
    let api: Api<Account> = Api::namespaced(client, namespace);
    let accounts = api.list(&ListParams::default()).await?;

    let mut matches: Vec<Account> = accounts
        .items
        .into_iter()
        .filter(|a| {
            let ready = a.status.as_ref().and_then(|s| s.state) == Some(account_types::AccountState::Ready);
            let unclaimed = !a.status.as_ref().map(|s| s.claimed).unwrap_or(false);
            let legal_entity_id = a
                .spec
                .legal_entity
                .as_ref()
                .map(|le| le.id.as_str())
                .unwrap_or("");
            ready && unclaimed && (legal_entity_id.is_empty() || legal_entity_id == claim_legal_entity_id)
        })
        .collect();

    matches.sort_by(|a, b| {
        let a_reuse = a
            .spec
            .legal_entity
            .as_ref()
            .map(|le| !le.is_empty())
            .unwrap_or(false);
        let b_reuse = b
            .spec
            .legal_entity
            .as_ref()
            .map(|le| !le.is_empty())
            .unwrap_or(false);
        b_reuse.cmp(&a_reuse).then_with(|| a.name_any().cmp(&b.name_any()))
    });
    Ok(matches.into_iter().next())
}

/// Sets `claimLink`/`claimLinkNamespace` on the account and
/// `accountLink`/`accountLinkNamespace` on the claim.
pub async fn bind_pool_account(
    client: Client,
    claim: &AccountClaim,
    claim_namespace: &str,
    account: &Account,
) -> Result<(), Error> {
    let account_namespace = account.namespace().unwrap_or_default();
    let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
    let account_patch = Patch::Merge(serde_json::json!({
        "spec": {
            "claimLink": claim.name_any(),
            "claimLinkNamespace": claim_namespace,
        }
    }));
    accounts_api
        .patch(&account.name_any(), &PatchParams::apply(crate::util::MANAGER_NAME), &account_patch)
        .await?;

    link_claim_to_account(client, claim, &account.name_any(), &account_namespace).await?;
    Ok(())
}

/// Copies the bound account's IAM-user credential secret into the
/// consumer-facing secret named by `claim.spec.awsCredentialSecret`.
pub async fn materialize_secret(
    client: Client,
    claim: &AccountClaim,
    claim_namespace: &str,
    account: &Account,
) -> Result<(), Error> {
    let secret_ref = claim
        .spec
        .aws_credential_secret
        .clone()
        .ok_or_else(|| Error::UserInputError("claim is missing awsCredentialSecret".to_owned()))?;

    let account_namespace = account.namespace().unwrap_or_default();
    let source_name = iam::derive_secret_name(&account.name_any());
    let source_api: Api<Secret> = Api::namespaced(client.clone(), &account_namespace);
    let source = source_api.get(&source_name).await?;

    let target_namespace = secret_ref.namespace.unwrap_or_else(|| claim_namespace.to_owned());
    let target = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(secret_ref.name),
            namespace: Some(target_namespace.clone()),
            owner_references: Some(vec![claim.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        data: source.data,
        ..Default::default()
    };
    let target_api: Api<Secret> = Api::namespaced(client, &target_namespace);
    target_api.create(&PostParams::default(), &target).await?;
    Ok(())
}

/// Transitions the claim to `Claimed`.
pub async fn mark_claimed(client: Client, claim: &AccountClaim) -> Result<(), Error> {
    patch_status(client, claim, |status| {
        status.state = Some(AccountClaimState::Claimed);
    })
    .await?;
    Ok(())
}

/// Release protocol for a BYOC claim: clean up the IAM entities this
/// operator built for the account (when a scoped client set for it is
/// available), delete the bound Account (owner-ref cascade removes its
/// secrets), then remove the claim's finalizer.
pub async fn release_byoc(
    client: Client,
    clients: Option<&crate::aws::ClientSet>,
    claim: &AccountClaim,
    claim_namespace: &str,
) -> Result<(), Error> {
    if let Some(account_name) = claim.spec.account_link.clone() {
        let account_namespace = claim
            .spec
            .account_link_namespace
            .clone()
            .unwrap_or_else(|| claim_namespace.to_owned());
        if let Some(clients) = clients {
            let _ = scrub::scrub_byoc_iam(clients, &account_name, &account_namespace).await;
        }
        let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
        let _ = accounts_api
            .delete(&account_name, &kube::api::DeleteParams::default())
            .await;
    }
    finalizer::delete::<AccountClaim>(client, &claim.name_any(), claim_namespace).await?;
    Ok(())
}

/// Release protocol for a pool-born claim: scrub the bound account and
/// reset its spec/status so it can serve a future claim.
pub async fn release_pool_account(
    client: Client,
    clients: &crate::aws::ClientSet,
    claim: &AccountClaim,
    claim_namespace: &str,
) -> Result<(), Error> {
    let account_name = claim
        .spec
        .account_link
        .clone()
        .ok_or_else(|| Error::UserInputError("claim release is missing accountLink".to_owned()))?;
    let account_namespace = claim
        .spec
        .account_link_namespace
        .clone()
        .unwrap_or_else(|| claim_namespace.to_owned());
    let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
    let account = accounts_api.get(&account_name).await?;

    let outcomes = scrub::scrub_account(clients).await;
    if !scrub::is_clean(&outcomes) {
        return Err(Error::UserInputError(format!(
            "scrub of account {account_name} did not complete cleanly"
        )));
    }
    let legal_entity_carry_over = legal_entity_carry_over(&account, claim);

    let spec_patch = Patch::Merge(serde_json::json!({
        "spec": {
            "claimLink": Option::<String>::None,
            "claimLinkNamespace": Option::<String>::None,
            "legalEntity": legal_entity_carry_over,
        }
    }));
    accounts_api
        .patch(&account_name, &PatchParams::apply(crate::util::MANAGER_NAME), &spec_patch)
        .await?;

    let account = accounts_api.get(&account_name).await?;
    patch_status(client.clone(), &account, apply_release_status).await?;

    finalizer::delete::<AccountClaim>(client, &claim.name_any(), claim_namespace).await?;
    Ok(())
}

/// A released account keeps its legal entity if it had one (the claim
/// reused it), otherwise inherits the releasing claim's — so a BYOC-style
/// pool account still carries a legal entity forward after its first
/// release.
pub(crate) fn legal_entity_carry_over(
    account: &Account,
    claim: &AccountClaim,
) -> Option<account_types::LegalEntity> {
    account
        .spec
        .legal_entity
        .clone()
        .filter(|le| !le.is_empty())
        .or_else(|| Some(claim.spec.legal_entity.clone()).filter(|le| !le.is_empty()))
}

/// Status applied to a pool account once it is scrubbed and released:
/// unclaimed, reused, credentials due for rotation, back to `Ready`.
pub(crate) fn apply_release_status(status: &mut account_types::AccountStatus) {
    status.rotate_credentials = true;
    status.rotate_console_credentials = true;
    status.claimed = false;
    status.reused = true;
    status.state = Some(account_types::AccountState::Ready);
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_types::{AccountClaimSpec, AccountSpec, AwsClaimSpec, LegalEntity};

    fn legal_entity(id: &str) -> LegalEntity {
        LegalEntity { id: id.to_owned(), name: id.to_owned() }
    }

    fn claim_with_legal_entity(id: &str) -> AccountClaim {
        AccountClaim {
            spec: AccountClaimSpec {
                legal_entity: legal_entity(id),
                aws: AwsClaimSpec::default(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn carries_over_the_accounts_own_legal_entity_when_set() {
        let account = Account {
            spec: AccountSpec { legal_entity: Some(legal_entity("L1")), ..Default::default() },
            ..Default::default()
        };
        let claim = claim_with_legal_entity("L2");
        assert_eq!(legal_entity_carry_over(&account, &claim), Some(legal_entity("L1")));
    }

    #[test]
    fn falls_back_to_the_claims_legal_entity_when_the_account_has_none() {
        let account = Account::default();
        let claim = claim_with_legal_entity("L2");
        assert_eq!(legal_entity_carry_over(&account, &claim), Some(legal_entity("L2")));
    }

    #[test]
    fn carries_over_nothing_when_neither_side_has_a_legal_entity() {
        let account = Account::default();
        let claim = AccountClaim::default();
        assert_eq!(legal_entity_carry_over(&account, &claim), None);
    }

    #[test]
    fn release_status_unclaims_and_flags_for_rotation() {
        let mut status = account_types::AccountStatus { claimed: true, ..Default::default() };
        apply_release_status(&mut status);
        assert!(!status.claimed);
        assert!(status.reused);
        assert!(status.rotate_credentials);
        assert!(status.rotate_console_credentials);
        assert_eq!(status.state, Some(account_types::AccountState::Ready));
    }

    #[test]
    fn builds_a_byoc_account_named_after_the_claim_and_iam_user_id() {
        let claim = AccountClaim {
            metadata: kube::api::ObjectMeta {
                name: Some("c1".to_owned()),
                uid: Some("11111111-1111-1111-1111-111111111111".to_owned()),
                ..Default::default()
            },
            spec: AccountClaimSpec {
                legal_entity: legal_entity("L1"),
                aws: AwsClaimSpec::default(),
                byoc: true,
                byoc_aws_account_id: Some("111122223333".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let account = build_byoc_account(&claim, "ns", "111122223333".to_owned(), "abc123");
        assert_eq!(account.metadata.name.as_deref(), Some("c1-abc123"));
        assert_eq!(account.metadata.namespace.as_deref(), Some("ns"));
        assert!(account.spec.byoc);
        assert_eq!(account.spec.aws_account_id.as_deref(), Some("111122223333"));
        assert_eq!(account.spec.claim_link.as_deref(), Some("c1"));
        assert_eq!(
            account.labels().get(account_types::IAM_USER_ID_LABEL).map(String::as_str),
            Some("abc123")
        );
    }
}
