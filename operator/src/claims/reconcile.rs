use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::controller::Action,
    runtime::Controller,
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::actions;
use crate::aws::ClientBuilder;
use crate::util::{finalizer::FINALIZER_NAME, Error, PROBE_INTERVAL};
use account_types::{Account, AccountClaim, AccountClaimState, IAM_USER_ID_LABEL};

/// Settings the AccountClaim reconciler needs beyond the CRDs themselves.
#[derive(Debug, Clone)]
pub struct ClaimsRuntimeConfig {
    /// Region used to assume a released account's role before scrubbing it.
    pub init_region: String,
}

pub async fn run(client: Client, builder: ClientBuilder, runtime: ClaimsRuntimeConfig) -> Result<(), Error> {
    info!("starting AccountClaim controller");

    let crd_api: Api<AccountClaim> = Api::all(client.clone());
    let context = Arc::new(ContextData { client, builder, runtime });

    Controller::new(crd_api, ListParams::default())
        .run(reconcile, on_error, context)
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(%err, "claim reconciliation error");
            }
        })
        .await;
    Ok(())
}

struct ContextData {
    client: Client,
    builder: ClientBuilder,
    runtime: ClaimsRuntimeConfig,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ClaimAction {
    Pending,
    ReleaseByoc,
    ReleasePool,
    BindByoc,
    BindPoolBorn,
    MaterializeSecret { account: Box<Account> },
    MarkClaimed,
    WaitForCapacity,
    NoOp,
}

/// Action for an unlinked claim: BYOC claims mint their own account,
/// pool-born claims wait for `BindPoolBorn` to find one.
pub(crate) fn bind_action(byoc: bool) -> ClaimAction {
    if byoc {
        ClaimAction::BindByoc
    } else {
        ClaimAction::BindPoolBorn
    }
}

/// Action for a claim under deletion: BYOC releases clean up delegated
/// IAM access, pool-born releases scrub and return the account.
pub(crate) fn release_action(byoc: bool) -> ClaimAction {
    if byoc {
        ClaimAction::ReleaseByoc
    } else {
        ClaimAction::ReleasePool
    }
}

fn needs_finalizer(instance: &AccountClaim) -> bool {
    !instance.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

async fn reconcile(instance: Arc<AccountClaim>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInputError("AccountClaim resources must be namespaced".to_owned())
    })?;
    let name = instance.name_any();

    let action = determine_action(client.clone(), &namespace, &instance).await?;
    if !matches!(action, ClaimAction::NoOp) {
        info!(%namespace, %name, ?action, "claim action");
    }

    let result = match action {
        ClaimAction::Pending => {
            crate::util::finalizer::add::<AccountClaim>(client, &name, &namespace).await?;
            Action::requeue(Duration::ZERO)
        }
        ClaimAction::ReleaseByoc => {
            let clients = byoc_release_clients(&context, &client, &instance, &namespace).await;
            actions::release_byoc(client, clients.as_ref(), &instance, &namespace).await?;
            Action::await_change()
        }
        ClaimAction::ReleasePool => {
            let account_name = instance.spec.account_link.clone().unwrap_or_default();
            let account_namespace = instance
                .spec
                .account_link_namespace
                .clone()
                .unwrap_or_else(|| namespace.clone());
            let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
            let account = accounts_api.get(&account_name).await?;
            let aws_account_id = account.spec.aws_account_id.clone().unwrap_or_default();
            let role_arn = format!("arn:aws:iam::{aws_account_id}:role/OrganizationAccountAccessRole");
            let clients = context
                .builder
                .assume_role(&context.runtime.init_region, &role_arn, "account-operator-release", None)
                .await?;
            actions::release_pool_account(client, &clients, &instance, &namespace).await?;
            Action::await_change()
        }
        ClaimAction::BindByoc => {
            let account = actions::bind_byoc(client, &instance, &namespace).await?;
            info!(account = account.name_any(), "claim bound to new BYOC account");
            Action::requeue(Duration::ZERO)
        }
        ClaimAction::BindPoolBorn => {
            let legal_entity_id = instance.spec.legal_entity.id.clone();
            match actions::find_candidate_account(client.clone(), &namespace, &legal_entity_id).await? {
                Some(account) => {
                    actions::bind_pool_account(client, &instance, &namespace, &account).await?;
                    Action::requeue(Duration::ZERO)
                }
                None => Action::requeue(PROBE_INTERVAL),
            }
        }
        ClaimAction::MaterializeSecret { account } => {
            actions::materialize_secret(client, &instance, &namespace, &account).await?;
            Action::requeue(Duration::ZERO)
        }
        ClaimAction::MarkClaimed => {
            actions::mark_claimed(client, &instance).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        ClaimAction::WaitForCapacity => Action::requeue(PROBE_INTERVAL),
        ClaimAction::NoOp => Action::requeue(PROBE_INTERVAL),
    };
    Ok(result)
}

/// Builds a client set scoped to the BYOC account's admin-access role, if
/// the bound account can be found and carries the labels/spec needed to
/// derive that role's ARN. Returns `None` on any lookup failure so
/// release always proceeds best-effort.
async fn byoc_release_clients(
    context: &ContextData,
    client: &Client,
    claim: &AccountClaim,
    namespace: &str,
) -> Option<crate::aws::ClientSet> {
    let account_name = claim.spec.account_link.clone()?;
    let account_namespace = claim
        .spec
        .account_link_namespace
        .clone()
        .unwrap_or_else(|| namespace.to_owned());
    let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
    let account = accounts_api.get_opt(&account_name).await.ok().flatten()?;
    let iam_user_id = account.labels().get(IAM_USER_ID_LABEL)?;
    let aws_account_id = account.spec.aws_account_id.clone()?;
    let role_arn = format!(
        "arn:aws:iam::{aws_account_id}:role/{}",
        crate::iam::byoc_role_name(iam_user_id)
    );
    context
        .builder
        .assume_role(&context.runtime.init_region, &role_arn, "account-operator-release", None)
        .await
        .ok()
}

async fn determine_action(
    client: Client,
    namespace: &str,
    instance: &AccountClaim,
) -> Result<ClaimAction, Error> {
    if instance.meta().deletion_timestamp.is_some() {
        return Ok(release_action(instance.spec.byoc));
    }

    if needs_finalizer(instance) {
        return Ok(ClaimAction::Pending);
    }

    let account_link = instance.spec.account_link.clone();
    let Some(account_name) = account_link else {
        return Ok(bind_action(instance.spec.byoc));
    };

    let account_namespace = instance
        .spec
        .account_link_namespace
        .clone()
        .unwrap_or_else(|| namespace.to_owned());
    let accounts_api: Api<Account> = Api::namespaced(client.clone(), &account_namespace);
    let account = match accounts_api.get_opt(&account_name).await? {
        Some(account) => account,
        None => return Ok(ClaimAction::WaitForCapacity),
    };

    let secret_name = instance
        .spec
        .aws_credential_secret
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    let secret_namespace = instance
        .spec
        .aws_credential_secret
        .as_ref()
        .and_then(|s| s.namespace.clone())
        .unwrap_or_else(|| namespace.to_owned());
    let secrets_api: Api<Secret> = Api::namespaced(client, &secret_namespace);
    if !secret_name.is_empty() && secrets_api.get_opt(&secret_name).await?.is_none() {
        return Ok(ClaimAction::MaterializeSecret { account: Box::new(account) });
    }

    if instance.status.as_ref().and_then(|s| s.state) != Some(AccountClaimState::Claimed) {
        return Ok(ClaimAction::MarkClaimed);
    }

    Ok(ClaimAction::NoOp)
}

fn on_error(instance: Arc<AccountClaim>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!(claim = instance.name_any(), %error, "claim reconciliation error");
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byoc_claims_mint_their_own_account() {
        assert_eq!(bind_action(true), ClaimAction::BindByoc);
        assert_eq!(bind_action(false), ClaimAction::BindPoolBorn);
    }

    #[test]
    fn byoc_claims_release_delegated_access_not_a_pool_slot() {
        assert_eq!(release_action(true), ClaimAction::ReleaseByoc);
        assert_eq!(release_action(false), ClaimAction::ReleasePool);
    }
}
