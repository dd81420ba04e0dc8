use crate::aws::retry::with_retry;
use crate::aws::{ClientBuilder, ClientSet};
use crate::iam;
use crate::region_init::{self, RegionJob};
use crate::support;
use crate::tags::{derive_account_email, TagSet};
use crate::util::patch::patch_status;
use crate::util::{messages, Error};
use account_types::{condition_types, Account, AccountClaim, AccountState, Condition, IAM_USER_ID_LABEL};
use aws_sdk_organizations::error::ProvideErrorMetadata;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use rand::Rng;

use super::reconcile::AccountsRuntimeConfig;

/// Name of the role assumed on a pool-born account.
const ORGANIZATION_ACCOUNT_ACCESS_ROLE: &str = "OrganizationAccountAccessRole";

/// STS role-assumption retry: up to 10 attempts, linearly growing sleep,
/// guarding against eventual-consistency on a freshly created role.
const ROLE_ASSUMPTION_ATTEMPTS: u32 = 10;

/// Generates the 6-character `iamUserId` label value.
pub fn generate_iam_user_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Adds the finalizer and, if absent, assigns the immutable `iamUserId`
/// label.
pub async fn ensure_pending(client: Client, instance: &Account) -> Result<Account, Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().unwrap_or_default();
    let instance =
        crate::util::finalizer::add::<Account>(client.clone(), &name, &namespace).await?;
    if instance.labels().get(IAM_USER_ID_LABEL).is_some() {
        return Ok(instance);
    }
    let api: Api<Account> = Api::namespaced(client, &namespace);
    let iam_user_id = generate_iam_user_id();
    let patch = Patch::Merge(serde_json::json!({
        "metadata": { "labels": { IAM_USER_ID_LABEL: iam_user_id } }
    }));
    Ok(api
        .patch(&name, &PatchParams::apply(crate::util::MANAGER_NAME), &patch)
        .await?)
}

/// Reads the `iamUserId` label, required for every role/secret name this
/// module derives once past the Pending step.
pub fn iam_user_id(instance: &Account) -> Result<String, Error> {
    instance
        .labels()
        .get(IAM_USER_ID_LABEL)
        .cloned()
        .ok_or_else(|| Error::UserInputError("account is missing its iamUserId label".to_owned()))
}

fn upsert(conditions: &mut Vec<Condition>, type_: &str, reason: &str, message: &str) {
    account_types::upsert_condition(
        conditions,
        Condition::new(type_, "True").with_reason(reason).with_message(message),
    );
}

/// Handles deletion teardown.
pub async fn handle_deletion(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
) -> Result<(), Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().unwrap_or_default();
    if instance.spec.byoc {
        let _ = iam::clean_up_iam(clients, &name, &namespace).await;
    } else {
        iam::clean_up_iam(clients, &name, &namespace).await?;
    }
    crate::util::finalizer::delete::<Account>(client, &name, &namespace).await?;
    Ok(())
}

/// Account-limit guard.
pub fn guard_account_limit(has_capacity: bool) -> Result<(), Error> {
    if !has_capacity {
        return Err(Error::AccountLimitExceeded);
    }
    Ok(())
}

/// BYOC initialization branch.
pub async fn initialize_byoc(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
    claim: &AccountClaim,
    iam_user_id: &str,
    operator_principal_arn: &str,
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

    let namespace = instance.namespace().unwrap_or_default();
    let tags = TagSet::build(instance, instance.name_any());
    iam::create_byoc_admin_access_role(clients, iam_user_id, operator_principal_arn, &tags).await?;

    let secret_namespace = secret_ref.namespace.clone().unwrap_or_else(|| namespace.clone());
    iam::rotate_byoc_access_keys(
        client.clone(),
        clients,
        instance,
        &secret_ref.name,
        &secret_namespace,
    )
    .await?;

    let updated = patch_status(client.clone(), instance, |status| {
        status.claimed = true;
        status.state = Some(AccountState::Creating);
        upsert(
            &mut status.conditions,
            condition_types::CREATING,
            "ByocInitialized",
            messages::CREATING,
        );
    })
    .await?;

    let _ = byoc_account_id;
    Ok(updated)
}

/// Pool-born account creation.
pub async fn create_pool_account(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
    email_prefix: &str,
    email_domain: &str,
) -> Result<Account, Error> {
    let name = instance.name_any();
    let email = derive_account_email(&name, email_prefix, email_domain);

    let create = with_retry(
        || {
            clients
                .organizations
                .create_account()
                .account_name(&name)
                .email(&email)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let request_id = create
        .create_account_status
        .and_then(|s| s.id)
        .ok_or_else(|| Error::UserInputError("CreateAccount returned no request id".to_owned()))?;

    let aws_account_id = poll_create_account_status(clients, &request_id).await?;

    let api: Api<Account> = Api::namespaced(client.clone(), &instance.namespace().unwrap_or_default());
    let mut spec_patch = instance.clone();
    spec_patch.spec.aws_account_id = Some(aws_account_id);
    let patch = kube::api::Patch::Merge(serde_json::json!({
        "spec": { "awsAccountId": spec_patch.spec.aws_account_id }
    }));
    let instance = api
        .patch(&name, &kube::api::PatchParams::apply(crate::util::MANAGER_NAME), &patch)
        .await?;

    let updated = patch_status(client, &instance, |status| {
        status.state = Some(AccountState::Creating);
        upsert(
            &mut status.conditions,
            condition_types::CREATING,
            "AccountCreated",
            messages::CREATING,
        );
    })
    .await?;
    Ok(updated)
}

async fn poll_create_account_status(
    clients: &ClientSet,
    request_id: &str,
) -> Result<String, Error> {
    loop {
        let status = with_retry(
            || {
                clients
                    .organizations
                    .describe_create_account_status()
                    .create_account_request_id(request_id)
                    .send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        let status = status
            .create_account_status
            .ok_or_else(|| Error::UserInputError("missing CreateAccountStatus".to_owned()))?;
        match status.state() {
            Some(aws_sdk_organizations::types::CreateAccountState::InProgress) => {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
            Some(aws_sdk_organizations::types::CreateAccountState::Succeeded) => {
                return status
                    .account_id
                    .ok_or_else(|| Error::UserInputError("no accountId on success".to_owned()));
            }
            _ => {
                let reason = status.failure_reason();
                return Err(match reason {
                    Some(aws_sdk_organizations::types::CreateAccountFailureReason::AccountLimitExceeded) => {
                        Error::AccountLimitExceeded
                    }
                    _ => Error::UserInputError(format!("CreateAccount failed: {:?}", reason)),
                });
            }
        }
    }
}

/// Stuck-creating check.
pub const STUCK_CREATING_TIMEOUT: chrono::Duration = chrono::Duration::minutes(30);

pub fn is_stuck_creating(instance: &Account) -> bool {
    let Some(status) = instance.status.as_ref() else { return false };
    let Some(condition) = account_types::find_condition(&status.conditions, condition_types::CREATING) else {
        return false;
    };
    let Some(probe) = condition.last_probe_time.as_ref() else { return false };
    let Ok(probe) = probe.parse::<chrono::DateTime<Utc>>() else { return false };
    Utc::now() - probe > STUCK_CREATING_TIMEOUT
}

pub async fn mark_failed(client: Client, instance: &Account, reason: &str) -> Result<(), Error> {
    patch_status(client, instance, |status| apply_failed_status(status, reason)).await?;
    Ok(())
}

pub(crate) fn apply_failed_status(status: &mut account_types::AccountStatus, reason: &str) {
    status.state = Some(AccountState::Failed);
    upsert(&mut status.conditions, condition_types::FAILED, reason, messages::FAILED);
}

/// Initialization: STS role assumption, IAM user builds, region-init.
pub async fn initialize_account(
    client: Client,
    builder: &ClientBuilder,
    instance: &Account,
    iam_user_id: &str,
    config: &AccountsRuntimeConfig,
) -> Result<Account, Error> {
    let aws_account_id = instance
        .spec
        .aws_account_id
        .clone()
        .ok_or_else(|| Error::UserInputError("awsAccountId missing during initialization".to_owned()))?;
    let role_name = if instance.spec.byoc {
        iam::byoc_role_name(iam_user_id)
    } else {
        ORGANIZATION_ACCOUNT_ACCESS_ROLE.to_owned()
    };
    let role_arn = format!("arn:aws:iam::{aws_account_id}:role/{role_name}");

    let clients = assume_role_with_retry(builder, &config.init_region, &role_arn, &role_name).await?;

    let namespace = instance.namespace().unwrap_or_default();
    let tags = TagSet::build(instance, instance.name_any());
    let admin_user_name = instance.name_any();
    let _secret_name = iam::build_iam_user(
        client.clone(),
        &clients,
        instance,
        &namespace,
        &admin_user_name,
        &tags,
    )
    .await?;

    let sre_user_name = format!("{}-sre", instance.name_any());
    let _sre_secret_name = iam::build_iam_user(
        client.clone(),
        &clients,
        instance,
        &namespace,
        &sre_user_name,
        &tags,
    )
    .await?;

    let jobs: Vec<RegionJob> = config
        .regions
        .iter()
        .map(|region| RegionJob {
            region: region.clone(),
            role_arn: role_arn.clone(),
            session_name: format!("account-operator-{}", instance.name_any()),
            ami_id: config
                .region_ami_map
                .get(region)
                .cloned()
                .unwrap_or_default(),
            quota_code: config.quota_code.clone(),
            desired_vcpu_quota: config.desired_vcpu_quota,
            kms_key_id: None,
        })
        .collect();
    let outcomes = region_init::initialize_supported_regions(builder, instance, &tags, jobs).await;
    for outcome in &outcomes {
        if let Err(ref err) = outcome.result {
            tracing::warn!(region = %outcome.region, %err, "region init reported an error");
        }
    }

    let next_state = post_initialize_state(instance.spec.byoc);
    let updated = patch_status(client, instance, |status| {
        status.state = Some(next_state);
        let type_ = match next_state {
            AccountState::Ready => condition_types::READY,
            _ => condition_types::PENDING_VERIFICATION,
        };
        upsert(&mut status.conditions, type_, "Initialized", messages::CREATING);
    })
    .await?;
    Ok(updated)
}

/// State an account lands in once initialization completes: BYOC
/// accounts skip support-tier verification entirely and go straight to
/// `Ready`; pool-born accounts still need a verification case resolved.
pub(crate) fn post_initialize_state(byoc: bool) -> AccountState {
    if byoc {
        AccountState::Ready
    } else {
        AccountState::PendingVerification
    }
}

async fn assume_role_with_retry(
    builder: &ClientBuilder,
    region: &str,
    role_arn: &str,
    expected_role_name: &str,
) -> Result<ClientSet, Error> {
    let mut delay = std::time::Duration::from_secs(1);
    for attempt in 1..=ROLE_ASSUMPTION_ATTEMPTS {
        let clients = builder
            .assume_role(region, role_arn, "account-operator-init", None)
            .await?;
        match with_retry(
            || clients.sts.get_caller_identity().send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        {
            Ok(identity) => {
                let assumed_role_id = identity.user_id.unwrap_or_default();
                if assumed_role_id.contains(expected_role_name) || attempt == ROLE_ASSUMPTION_ATTEMPTS {
                    return Ok(clients);
                }
            }
            Err(_) if attempt < ROLE_ASSUMPTION_ATTEMPTS => {}
            Err(err) => return Err(Error::aws(err)),
        }
        tokio::time::sleep(delay).await;
        delay += std::time::Duration::from_secs(4);
    }
    Err(Error::FederatedAccessRoleNotFound(role_arn.to_owned()))
}

/// Verification step.
pub async fn begin_verification(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
) -> Result<Account, Error> {
    let aws_account_id = instance.spec.aws_account_id.clone().unwrap_or_default();
    let case_id = support::create_case(clients, &aws_account_id).await?;
    let updated = patch_status(client, instance, |status| {
        status.support_case_id = Some(case_id);
    })
    .await?;
    Ok(updated)
}

pub async fn poll_verification(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
    case_id: &str,
) -> Result<bool, Error> {
    let resolved = support::is_resolved(clients, case_id).await?;
    if resolved {
        patch_status(client, instance, apply_verification_resolved_status).await?;
    }
    Ok(resolved)
}

pub(crate) fn apply_verification_resolved_status(status: &mut account_types::AccountStatus) {
    status.state = Some(AccountState::Ready);
    upsert(&mut status.conditions, condition_types::READY, "CaseResolved", messages::READY);
}

/// Claim status mirroring.
pub async fn mark_claimed(client: Client, instance: &Account) -> Result<(), Error> {
    patch_status(client, instance, |status| {
        status.claimed = true;
    })
    .await?;
    Ok(())
}

/// Credential rotation.
pub async fn rotate_credentials(
    client: Client,
    clients: &ClientSet,
    instance: &Account,
    role_arn: &str,
    region: &str,
) -> Result<(), Error> {
    let namespace = instance.namespace().unwrap_or_default();
    let secret_name = format!("{}-sre-credentials", instance.name_any());
    let secret_api: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    let assumed = with_retry(
        || {
            clients
                .sts
                .assume_role()
                .role_arn(role_arn)
                .role_session_name("account-operator-rotate")
                .duration_seconds(3600)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let creds = assumed
        .credentials
        .ok_or_else(|| Error::UserInputError("AssumeRole returned no credentials".to_owned()))?;

    // Delete-then-create keeps the secret write atomic from the
    // consumer's perspective: there is never a window with stale keys
    // alongside a partially-written new secret.
    let _ = secret_api.delete(&secret_name, &DeleteParams::default()).await;

    let mut data = std::collections::BTreeMap::new();
    data.insert(
        "aws_access_key_id".to_owned(),
        k8s_openapi::ByteString(creds.access_key_id.into_bytes()),
    );
    data.insert(
        "aws_secret_access_key".to_owned(),
        k8s_openapi::ByteString(creds.secret_access_key.into_bytes()),
    );
    data.insert(
        "aws_session_token".to_owned(),
        k8s_openapi::ByteString(creds.session_token.into_bytes()),
    );
    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(secret_name),
            namespace: Some(namespace),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    secret_api.create(&PostParams::default(), &secret).await?;

    patch_status(client, instance, |status| {
        status.rotate_credentials = false;
    })
    .await?;
    let _ = region;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_types::AccountStatus;

    fn creating_account_probed(ago: chrono::Duration) -> Account {
        let probe = (Utc::now() - ago).to_rfc3339();
        let mut conditions = Vec::new();
        account_types::upsert_condition(
            &mut conditions,
            Condition::new(condition_types::CREATING, "True")
                .with_reason("AccountCreated")
                .with_message(messages::CREATING),
        );
        conditions[0].last_probe_time = Some(probe);
        Account {
            status: Some(AccountStatus { conditions, ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn not_stuck_before_the_timeout_elapses() {
        let account = creating_account_probed(STUCK_CREATING_TIMEOUT - chrono::Duration::seconds(1));
        assert!(!is_stuck_creating(&account));
    }

    #[test]
    fn stuck_once_the_timeout_elapses() {
        let account = creating_account_probed(STUCK_CREATING_TIMEOUT + chrono::Duration::seconds(1));
        assert!(is_stuck_creating(&account));
    }

    #[test]
    fn not_stuck_without_a_creating_condition() {
        assert!(!is_stuck_creating(&Account::default()));
    }

    #[test]
    fn apply_failed_status_sets_state_and_condition() {
        let mut status = AccountStatus::default();
        apply_failed_status(&mut status, "account limit exceeded");
        assert_eq!(status.state, Some(AccountState::Failed));
        let condition =
            account_types::find_condition(&status.conditions, condition_types::FAILED).unwrap();
        assert_eq!(condition.message.as_deref(), Some(messages::FAILED));
    }
}
