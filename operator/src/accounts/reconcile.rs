use futures::stream::StreamExt;
use kube::ResourceExt;
use kube::{
    api::ListParams, client::Client, runtime::controller::Action, runtime::Controller, Api,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::actions;
use crate::aws::ClientBuilder;
use crate::support;
use crate::util::config::ConfigCache;
use crate::util::{finalizer::FINALIZER_NAME, Error, PROBE_INTERVAL};
use crate::watchers::CeilingCache;
use account_types::{Account, AccountClaim, AccountState};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Settings an operating deployment supplies to the Account reconciler
/// that do not belong on any CRD.
#[derive(Debug, Clone)]
pub struct AccountsRuntimeConfig {
    /// Region used to assume the BYOC principal/STS identity check before
    /// a per-region client set is built.
    pub init_region: String,
    /// Regions every account is initialized in.
    pub regions: Vec<String>,
    /// AMI id to launch the region-init sentinel from, per region.
    pub region_ami_map: HashMap<String, String>,
    /// Service Quotas quota code for the vCPU limit raised per region.
    pub quota_code: String,
    pub desired_vcpu_quota: f64,
    /// Local part of the email address derived for pool-born accounts.
    pub email_prefix: String,
    pub email_domain: String,
}

/// Entrypoint for the `Account` controller.
pub async fn run(
    client: Client,
    builder: ClientBuilder,
    ceiling: CeilingCache,
    config: ConfigCache,
    runtime: AccountsRuntimeConfig,
) -> Result<(), Error> {
    info!("starting Account controller");

    let crd_api: Api<Account> = Api::all(client.clone());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client, builder, ceiling, config, runtime));

    Controller::new(crd_api, ListParams::default())
        .run(reconcile, on_error, context)
        .for_each(|reconciliation_result| async move {
            if let Err(err) = reconciliation_result {
                warn!(%err, "account reconciliation error");
            }
        })
        .await;
    Ok(())
}

struct ContextData {
    client: Client,
    builder: ClientBuilder,
    ceiling: CeilingCache,
    config: ConfigCache,
    runtime: AccountsRuntimeConfig,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(
        client: Client,
        builder: ClientBuilder,
        ceiling: CeilingCache,
        config: ConfigCache,
        runtime: AccountsRuntimeConfig,
    ) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                builder,
                ceiling,
                config,
                runtime,
                metrics: ControllerMetrics::new("accounts"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData { client, builder, ceiling, config, runtime }
        }
    }

    /// The vCPU quota to request per region: the live ConfigMap value
    /// when set, falling back to the CLI-supplied default.
    fn desired_vcpu_quota(&self) -> f64 {
        self.config.load().quota_vcpu.unwrap_or(self.runtime.desired_vcpu_quota)
    }
}

/// Action to be taken upon an `Account` resource during reconciliation.
#[derive(Debug, PartialEq)]
pub(crate) enum AccountAction {
    /// Add the finalizer and assign the immutable `iamUserId` label.
    Pending,
    /// Tear down owned IAM entities and remove the finalizer.
    Delete,
    /// The account-number ceiling has been reached; wait it out.
    LimitExceeded,
    /// Bind the BYOC role to the claim's pre-existing account.
    InitializeByoc,
    /// Issue `CreateAccount` for a pool-born account.
    CreatePoolAccount,
    /// `Creating` has exceeded the stuck-creating timeout.
    StuckCreating,
    /// Assume the account's federated role and build its IAM users and
    /// regional footprint.
    Initialize,
    /// Open the support-tier verification case.
    BeginVerification,
    /// Poll the open verification case for resolution.
    PollVerification { case_id: String },
    /// Mirror `claimed = true` once a claim has linked but not yet synced.
    MarkClaimed,
    /// Reissue the STS credential secret flagged by the watcher.
    RotateCredentials,
    /// Resource is in its desired state.
    NoOp,
}

impl AccountAction {
    fn to_str(&self) -> &str {
        match self {
            AccountAction::Pending => "Pending",
            AccountAction::Delete => "Delete",
            AccountAction::LimitExceeded => "LimitExceeded",
            AccountAction::InitializeByoc => "InitializeByoc",
            AccountAction::CreatePoolAccount => "CreatePoolAccount",
            AccountAction::StuckCreating => "StuckCreating",
            AccountAction::Initialize => "Initialize",
            AccountAction::BeginVerification => "BeginVerification",
            AccountAction::PollVerification { .. } => "PollVerification",
            AccountAction::MarkClaimed => "MarkClaimed",
            AccountAction::RotateCredentials => "RotateCredentials",
            AccountAction::NoOp => "NoOp",
        }
    }
}

/// Action for an Account that has never been touched by this reconciler:
/// BYOC accounts skip straight to role binding, pool-born accounts wait
/// on the account-ceiling guard before `CreateAccount` is issued.
pub(crate) fn initial_action(byoc: bool, has_capacity: bool) -> AccountAction {
    if byoc {
        AccountAction::InitializeByoc
    } else if !has_capacity {
        AccountAction::LimitExceeded
    } else {
        AccountAction::CreatePoolAccount
    }
}

fn needs_finalizer(instance: &Account) -> bool {
    !instance.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

async fn reconcile(instance: Arc<Account>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInputError("Account resources must be namespaced".to_owned())
    })?;
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let action = determine_action(client.clone(), &context, &instance).await?;

    if action != AccountAction::NoOp {
        info!(%namespace, %name, action = action.to_str(), "account action");
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();
    #[cfg(feature = "metrics")]
    let timer = match action {
        AccountAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    let result = match action {
        AccountAction::Pending => {
            actions::ensure_pending(client, &instance).await?;
            Action::requeue(Duration::ZERO)
        }
        AccountAction::Delete => {
            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            actions::handle_deletion(client, &clients, &instance).await?;
            Action::await_change()
        }
        AccountAction::LimitExceeded => Action::requeue(PROBE_INTERVAL),
        AccountAction::InitializeByoc => {
            let claim_name = instance.spec.claim_link.clone().ok_or_else(|| {
                Error::UserInputError("byoc account is missing claimLink".to_owned())
            })?;
            let claim_namespace = instance
                .spec
                .claim_link_namespace
                .clone()
                .unwrap_or_else(|| namespace.clone());
            let claim_api: Api<AccountClaim> = Api::namespaced(client.clone(), &claim_namespace);
            let claim = claim_api.get(&claim_name).await?;

            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            let operator_principal_arn = clients.operator_principal_arn().await?;
            let iam_user_id = actions::iam_user_id(&instance)?;
            actions::initialize_byoc(
                client,
                &clients,
                &instance,
                &claim,
                &iam_user_id,
                &operator_principal_arn,
            )
            .await?;
            Action::requeue(Duration::ZERO)
        }
        AccountAction::CreatePoolAccount => {
            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            actions::create_pool_account(
                client,
                &clients,
                &instance,
                &context.runtime.email_prefix,
                &context.runtime.email_domain,
            )
            .await?;
            Action::requeue(Duration::ZERO)
        }
        AccountAction::StuckCreating => {
            actions::mark_failed(client, &instance, &Error::StuckCreating.to_string()).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        AccountAction::Initialize => {
            let iam_user_id = actions::iam_user_id(&instance)?;
            let runtime = AccountsRuntimeConfig {
                desired_vcpu_quota: context.desired_vcpu_quota(),
                ..context.runtime.clone()
            };
            actions::initialize_account(client, &context.builder, &instance, &iam_user_id, &runtime)
                .await?;
            Action::requeue(Duration::ZERO)
        }
        AccountAction::BeginVerification => {
            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            actions::begin_verification(client, &clients, &instance).await?;
            let aws_account_id = instance.spec.aws_account_id.clone().unwrap_or_default();
            Action::requeue(support::first_poll_delay(&aws_account_id))
        }
        AccountAction::PollVerification { case_id } => {
            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            let resolved = actions::poll_verification(client, &clients, &instance, &case_id).await?;
            if resolved {
                Action::requeue(Duration::ZERO)
            } else {
                Action::requeue(support::SUBSEQUENT_POLL_DELAY)
            }
        }
        AccountAction::MarkClaimed => {
            actions::mark_claimed(client, &instance).await?;
            Action::requeue(Duration::ZERO)
        }
        AccountAction::RotateCredentials => {
            let iam_user_id = actions::iam_user_id(&instance)?;
            let clients = context.builder.scoped(&context.runtime.init_region, None).await?;
            let role_arn = format!(
                "arn:aws:iam::{}:role/{}",
                instance.spec.aws_account_id.clone().unwrap_or_default(),
                if instance.spec.byoc {
                    crate::iam::byoc_role_name(&iam_user_id)
                } else {
                    "OrganizationAccountAccessRole".to_owned()
                }
            );
            actions::rotate_credentials(client, &clients, &instance, &role_arn, &context.runtime.init_region)
                .await?;
            Action::requeue(PROBE_INTERVAL)
        }
        AccountAction::NoOp => Action::requeue(PROBE_INTERVAL),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

async fn determine_action(
    _client: Client,
    context: &ContextData,
    instance: &Account,
) -> Result<AccountAction, Error> {
    if instance.meta().deletion_timestamp.is_some() {
        return Ok(AccountAction::Delete);
    }

    if needs_finalizer(instance) {
        return Ok(AccountAction::Pending);
    }

    let state = instance.status.as_ref().and_then(|s| s.state);
    match state {
        None => Ok(initial_action(instance.spec.byoc, context.ceiling.load().has_capacity())),
        Some(AccountState::Creating) => {
            if actions::is_stuck_creating(instance) {
                Ok(AccountAction::StuckCreating)
            } else {
                Ok(AccountAction::Initialize)
            }
        }
        Some(AccountState::PendingVerification) => {
            let case_id = instance.status.as_ref().and_then(|s| s.support_case_id.clone());
            match case_id {
                None => Ok(AccountAction::BeginVerification),
                Some(case_id) => Ok(AccountAction::PollVerification { case_id }),
            }
        }
        Some(AccountState::Ready) => {
            let status = instance.status.as_ref();
            if status.map(|s| s.rotate_credentials).unwrap_or(false) {
                return Ok(AccountAction::RotateCredentials);
            }
            let claimed = status.map(|s| s.claimed).unwrap_or(false);
            if instance.spec.claim_link.is_some() && !claimed {
                return Ok(AccountAction::MarkClaimed);
            }
            Ok(AccountAction::NoOp)
        }
        Some(AccountState::Failed) => Ok(AccountAction::NoOp),
    }
}

fn on_error(instance: Arc<Account>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!(account = instance.name_any(), %error, "account reconciliation error");
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byoc_accounts_skip_the_capacity_ceiling() {
        assert_eq!(initial_action(true, false), AccountAction::InitializeByoc);
        assert_eq!(initial_action(true, true), AccountAction::InitializeByoc);
    }

    #[test]
    fn pool_born_accounts_wait_on_the_ceiling() {
        assert_eq!(initial_action(false, false), AccountAction::LimitExceeded);
        assert_eq!(initial_action(false, true), AccountAction::CreatePoolAccount);
    }
}
