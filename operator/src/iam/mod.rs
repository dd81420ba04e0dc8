//! IAM user/role builder and teardown.

use crate::aws::retry::with_retry;
use crate::aws::ClientSet;
use crate::tags::TagSet;
use crate::util::Error;
use aws_sdk_iam::error::ProvideErrorMetadata;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

/// AWS-managed policy attached to every operator-created IAM user/role.
const ADMINISTRATOR_ACCESS_ARN: &str = "arn:aws:iam::aws:policy/AdministratorAccess";

/// Attempts up to 100 times at 500ms intervals.
const POLICY_ATTACH_ATTEMPTS: u32 = 100;
const POLICY_ATTACH_INTERVAL: Duration = Duration::from_millis(500);

/// Derives the secret name an IAM user's access keys are written to:
/// `<account>-secret`, lowercased.
pub fn derive_secret_name(account_name: &str) -> String {
    format!("{}-secret", account_name).to_lowercase()
}

/// Idempotently builds an IAM user and its credential secret. Returns the name of the Kubernetes secret
/// holding the access key.
pub async fn build_iam_user(
    kube_client: Client,
    clients: &ClientSet,
    owner: &(impl kube::Resource<DynamicType = ()> + ResourceExt),
    namespace: &str,
    user_name: &str,
    tags: &TagSet,
) -> Result<String, Error> {
    ensure_user_exists(clients, user_name, tags).await?;
    attach_administrator_access(clients, user_name).await?;

    let secret_name = derive_secret_name(user_name);
    let secret_api: Api<Secret> = Api::namespaced(kube_client, namespace);
    if secret_api.get_opt(&secret_name).await?.is_some() {
        // Secret already exists: the user was built before, nothing to do.
        return Ok(secret_name);
    }

    rotate_access_keys(clients, &secret_api, user_name, &secret_name, namespace, owner).await?;
    Ok(secret_name)
}

async fn ensure_user_exists(
    clients: &ClientSet,
    user_name: &str,
    tags: &TagSet,
) -> Result<(), Error> {
    let found = with_retry(
        || clients.iam.get_user().user_name(user_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await;
    match found {
        Ok(_) => Ok(()),
        Err(err) if err.code() == Some("NoSuchEntity") => {
            with_retry(
                || {
                    clients
                        .iam
                        .create_user()
                        .user_name(user_name)
                        .set_tags(Some(tags.to_iam_tags()))
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
            Ok(())
        }
        Err(err) => Err(Error::aws(err)),
    }
}

async fn attach_administrator_access(clients: &ClientSet, user_name: &str) -> Result<(), Error> {
    for attempt in 1..=POLICY_ATTACH_ATTEMPTS {
        match with_retry(
            || {
                clients
                    .iam
                    .attach_user_policy()
                    .user_name(user_name)
                    .policy_arn(ADMINISTRATOR_ACCESS_ARN)
                    .send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        {
            Ok(_) => return Ok(()),
            Err(_) if attempt < POLICY_ATTACH_ATTEMPTS => sleep(POLICY_ATTACH_INTERVAL).await,
            Err(err) => return Err(Error::aws(err)),
        }
    }
    Ok(())
}

/// A freshly issued access key pair.
struct NewAccessKey {
    access_key_id: String,
    secret_access_key: String,
}

/// Deletes every existing access key for `user_name` and creates a fresh
/// one.
async fn issue_access_key(clients: &ClientSet, user_name: &str) -> Result<NewAccessKey, Error> {
    let existing = with_retry(
        || clients.iam.list_access_keys().user_name(user_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    for key in existing.access_key_metadata() {
        if let Some(id) = key.access_key_id() {
            with_retry(
                || {
                    clients
                        .iam
                        .delete_access_key()
                        .user_name(user_name)
                        .access_key_id(id)
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
    }

    let created = with_retry(
        || clients.iam.create_access_key().user_name(user_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let access_key = created
        .access_key
        .ok_or_else(|| Error::UserInputError("CreateAccessKey returned no key".to_owned()))?;
    Ok(NewAccessKey {
        access_key_id: access_key.access_key_id().to_owned(),
        secret_access_key: access_key.secret_access_key().to_owned(),
    })
}

/// Deletes all existing access keys for `user_name` and creates a fresh
/// one, writing it into a Kubernetes secret owned by `owner`. Used for
/// operator-created users, where the secret does not yet exist.
async fn rotate_access_keys(
    clients: &ClientSet,
    secret_api: &Api<Secret>,
    user_name: &str,
    secret_name: &str,
    namespace: &str,
    owner: &(impl kube::Resource<DynamicType = ()> + ResourceExt),
) -> Result<(), Error> {
    let key = issue_access_key(clients, user_name).await?;
    write_credential_secret(
        secret_api,
        owner,
        namespace,
        secret_name,
        user_name,
        &key.access_key_id,
        &key.secret_access_key,
    )
    .await
}

/// Rotates the access keys of a tenant-supplied BYOC IAM user. The
/// secret named by `secret_name`/`namespace` must already exist and
/// carry an `aws_user_name` key identifying the user to rotate; it is
/// replaced in place with the new key pair.
pub async fn rotate_byoc_access_keys(
    kube_client: Client,
    clients: &ClientSet,
    owner: &(impl kube::Resource<DynamicType = ()> + ResourceExt),
    secret_name: &str,
    namespace: &str,
) -> Result<(), Error> {
    let secret_api: Api<Secret> = Api::namespaced(kube_client, namespace);
    let secret = secret_api.get(secret_name).await?;
    let data = secret
        .data
        .ok_or_else(|| Error::UserInputError(format!("secret {secret_name} has no data")))?;
    let user_name = data
        .get("aws_user_name")
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        .ok_or_else(|| {
            Error::UserInputError(format!("secret {secret_name} missing aws_user_name"))
        })?;

    let key = issue_access_key(clients, &user_name).await?;
    let _ = secret_api
        .delete(secret_name, &kube::api::DeleteParams::default())
        .await;
    write_credential_secret(
        &secret_api,
        owner,
        namespace,
        secret_name,
        &user_name,
        &key.access_key_id,
        &key.secret_access_key,
    )
    .await
}

/// Writes `<keys>` into a Secret named `secret_name`, owned by `owner` so
/// the Kubernetes garbage collector removes it alongside the Account.
pub async fn write_credential_secret(
    secret_api: &Api<Secret>,
    owner: &(impl kube::Resource<DynamicType = ()> + ResourceExt),
    namespace: &str,
    secret_name: &str,
    user_name: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<(), Error> {
    let mut data = BTreeMap::new();
    data.insert(
        "aws_user_name".to_owned(),
        k8s_openapi::ByteString(user_name.as_bytes().to_vec()),
    );
    data.insert(
        "aws_access_key_id".to_owned(),
        k8s_openapi::ByteString(access_key_id.as_bytes().to_vec()),
    );
    data.insert(
        "aws_secret_access_key".to_owned(),
        k8s_openapi::ByteString(secret_access_key.as_bytes().to_vec()),
    );
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_owned()),
            namespace: Some(namespace.to_owned()),
            owner_references: Some(vec![owner.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    secret_api.create(&PostParams::default(), &secret).await?;
    Ok(())
}

/// Builds (or rebuilds) the `BYOCAdminAccess-<iamUserId>` role used for
/// BYOC account access delegation.
///
/// If a role of that name already exists it is purged first (detach all
/// attached policies, delete role) so its trust policy and tags are
/// guaranteed current, favoring always-fresh state over incremental
/// reconciliation.
pub async fn create_byoc_admin_access_role(
    clients: &ClientSet,
    iam_user_id: &str,
    operator_principal_arn: &str,
    tags: &TagSet,
) -> Result<String, Error> {
    let role_name = byoc_role_name(iam_user_id);

    if with_retry(
        || clients.iam.get_role().role_name(&role_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .is_ok()
    {
        purge_role(clients, &role_name).await?;
    }

    let trust_policy = trust_policy_document(operator_principal_arn);
    with_retry(
        || {
            clients
                .iam
                .create_role()
                .role_name(&role_name)
                .assume_role_policy_document(trust_policy.as_str())
                .set_tags(Some(tags.to_iam_tags()))
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;

    with_retry(
        || {
            clients
                .iam
                .attach_role_policy()
                .role_name(&role_name)
                .policy_arn(ADMINISTRATOR_ACCESS_ARN)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;

    verify_policy_attached(clients, &role_name).await?;
    Ok(role_name)
}

pub fn byoc_role_name(iam_user_id: &str) -> String {
    format!("BYOCAdminAccess-{iam_user_id}")
}

fn trust_policy_document(principal_arn: &str) -> String {
    format!(
        r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Principal":{{"AWS":"{principal_arn}"}},"Action":"sts:AssumeRole"}}]}}"#
    )
}

async fn purge_role(clients: &ClientSet, role_name: &str) -> Result<(), Error> {
    let attached = with_retry(
        || clients.iam.list_attached_role_policies().role_name(role_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    for policy in attached.attached_policies() {
        if let Some(arn) = policy.policy_arn() {
            with_retry(
                || {
                    clients
                        .iam
                        .detach_role_policy()
                        .role_name(role_name)
                        .policy_arn(arn)
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
    }
    with_retry(
        || clients.iam.delete_role().role_name(role_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    Ok(())
}

/// Polls attached-policy listing until `AdministratorAccess` shows up,
/// tolerating the same eventual-consistency window as the user-side
/// policy attach loop.
async fn verify_policy_attached(clients: &ClientSet, role_name: &str) -> Result<(), Error> {
    for attempt in 1..=POLICY_ATTACH_ATTEMPTS {
        let attached = with_retry(
            || clients.iam.list_attached_role_policies().role_name(role_name).send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        if attached
            .attached_policies()
            .iter()
            .any(|p| p.policy_arn() == Some(ADMINISTRATOR_ACCESS_ARN))
        {
            return Ok(());
        }
        if attempt < POLICY_ATTACH_ATTEMPTS {
            sleep(POLICY_ATTACH_INTERVAL).await;
        }
    }
    Ok(())
}

/// Enumerates IAM users and roles tagged with the given account/namespace
/// pair, detaches their policies, deletes their access keys, and deletes
/// the entities. Untagged entities are left alone.
pub async fn clean_up_iam(
    clients: &ClientSet,
    account_name: &str,
    namespace: &str,
) -> Result<(), Error> {
    let users = with_retry(|| clients.iam.list_users().send(), |e| e.code().map(str::to_owned))
        .await
        .map_err(Error::aws)?;
    for user in users.users() {
        let user_name = user.user_name();
        let tags = with_retry(
            || clients.iam.list_user_tags().user_name(user_name).send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        let tag_map: std::collections::HashMap<String, String> = tags
            .tags()
            .iter()
            .map(|t| (t.key().to_owned(), t.value().to_owned()))
            .collect();
        if !TagSet::matches_account(account_name, namespace, &tag_map) {
            continue;
        }
        delete_user_policies_and_keys(clients, user_name).await?;
        with_retry(
            || clients.iam.delete_user().user_name(user_name).send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
    }

    let roles = with_retry(|| clients.iam.list_roles().send(), |e| e.code().map(str::to_owned))
        .await
        .map_err(Error::aws)?;
    for role in roles.roles() {
        let role_name = role.role_name();
        let tags = with_retry(
            || clients.iam.list_role_tags().role_name(role_name).send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        let tag_map: std::collections::HashMap<String, String> = tags
            .tags()
            .iter()
            .map(|t| (t.key().to_owned(), t.value().to_owned()))
            .collect();
        if !TagSet::matches_account(account_name, namespace, &tag_map) {
            continue;
        }
        purge_role(clients, role_name).await?;
    }
    Ok(())
}

async fn delete_user_policies_and_keys(clients: &ClientSet, user_name: &str) -> Result<(), Error> {
    let attached = with_retry(
        || clients.iam.list_attached_user_policies().user_name(user_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    for policy in attached.attached_policies() {
        if let Some(arn) = policy.policy_arn() {
            with_retry(
                || {
                    clients
                        .iam
                        .detach_user_policy()
                        .user_name(user_name)
                        .policy_arn(arn)
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
    }
    let keys = with_retry(
        || clients.iam.list_access_keys().user_name(user_name).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    for key in keys.access_key_metadata() {
        if let Some(id) = key.access_key_id() {
            with_retry(
                || {
                    clients
                        .iam
                        .delete_access_key()
                        .user_name(user_name)
                        .access_key_id(id)
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_name_is_lowercased() {
        assert_eq!(derive_secret_name("Pool-Account-ABC"), "pool-account-abc-secret");
    }

    #[test]
    fn byoc_role_name_embeds_iam_user_id() {
        assert_eq!(byoc_role_name("a1b2c3"), "BYOCAdminAccess-a1b2c3");
    }
}
