//! Validation / placement controller: verifies every
//! pool-born Account sits in the configured OU subtree and bears the
//! correct owner tag.

use crate::aws::retry::with_retry;
use crate::aws::ClientBuilder;
use crate::aws::ClientSet;
use crate::tags::OWNER;
use crate::util::config::OperatorConfig;
use crate::util::Error;
use account_types::Account;
use arc_swap::ArcSwap;
use aws_sdk_organizations::error::ProvideErrorMetadata;
use kube::api::{Api, ListParams};
use kube::client::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of validating one account, reported back to the caller for
/// logging/metrics; never mutates the Account CR directly.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub moved: bool,
    pub misplaced: bool,
    pub tag_corrected: bool,
}

/// Walks `ListParents` from `aws_account_id` and verifies the configured
/// pool OU is the immediate parent; optionally moves the account and/or
/// corrects its `owner` tag.
pub async fn validate_placement(
    clients: &ClientSet,
    aws_account_id: &str,
    config: &OperatorConfig,
) -> Result<ValidationReport, Error> {
    let mut report = ValidationReport::default();

    let parents = with_retry(
        || clients.organizations.list_parents().child_id(aws_account_id).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let immediate_parent = parents.parents().first().and_then(|p| p.id());

    if immediate_parent != Some(config.root.as_str()) {
        report.misplaced = true;
        if config.feature_validation_move_account {
            if let Some(current) = immediate_parent {
                with_retry(
                    || {
                        clients
                            .organizations
                            .move_account()
                            .account_id(aws_account_id)
                            .source_parent_id(current)
                            .destination_parent_id(&config.root)
                            .send()
                    },
                    |e| e.code().map(str::to_owned),
                )
                .await
                .map_err(Error::aws)?;
                report.moved = true;
            }
        }
    }

    let tags = with_retry(
        || {
            clients
                .organizations
                .list_tags_for_resource()
                .resource_id(aws_account_id)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let tag_map: HashMap<String, String> = tags
        .tags()
        .iter()
        .map(|t| (t.key().to_owned(), t.value().to_owned()))
        .collect();
    let current_owner = tag_map.get(OWNER).map(String::as_str);
    if current_owner != Some(config.shard_name.as_str()) {
        if config.feature_validation_tag_account {
            if current_owner.is_some() {
                with_retry(
                    || {
                        clients
                            .organizations
                            .untag_resource()
                            .resource_id(aws_account_id)
                            .tag_keys(OWNER)
                            .send()
                    },
                    |e| e.code().map(str::to_owned),
                )
                .await
                .map_err(Error::aws)?;
            }
            let tag = aws_sdk_organizations::types::Tag::builder()
                .key(OWNER)
                .value(&config.shard_name)
                .build()
                .map_err(Error::aws)?;
            with_retry(
                || {
                    clients
                        .organizations
                        .tag_resource()
                        .resource_id(aws_account_id)
                        .tags(tag.clone())
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
            report.tag_corrected = true;
        }
    }

    Ok(report)
}

/// How often every pool-born account in `namespace` is re-validated.
const VALIDATION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Background loop: re-reads [`OperatorConfig`] each sweep, lists every
/// non-BYOC Account that has an `awsAccountId`, and validates its
/// placement. Runs until the process exits.
pub async fn run(
    client: Client,
    builder: ClientBuilder,
    namespace: String,
    init_region: String,
) {
    let config_cache = Arc::new(ArcSwap::from_pointee(OperatorConfig::default()));
    loop {
        match OperatorConfig::load(client.clone(), &namespace).await {
            Ok(config) => config_cache.store(Arc::new(config)),
            Err(err) => warn!(%err, "placement controller failed to load operator config"),
        }

        if let Err(err) = sweep_once(&client, &builder, &init_region, &config_cache.load()).await {
            warn!(%err, "placement sweep failed");
        }
        tokio::time::sleep(VALIDATION_SWEEP_INTERVAL).await;
    }
}

async fn sweep_once(
    client: &Client,
    builder: &ClientBuilder,
    init_region: &str,
    config: &OperatorConfig,
) -> Result<(), Error> {
    let accounts_api: Api<Account> = Api::all(client.clone());
    let accounts = accounts_api.list(&ListParams::default()).await?;
    let clients = builder.scoped(init_region, None).await?;

    for account in accounts.items {
        if account.spec.byoc {
            continue;
        }
        let Some(aws_account_id) = account.spec.aws_account_id.as_deref() else {
            continue;
        };
        match validate_placement(&clients, aws_account_id, config).await {
            Ok(report) if report.moved || report.tag_corrected => {
                info!(aws_account_id, ?report, "corrected account placement");
            }
            Ok(_) => {}
            Err(err) => warn!(aws_account_id, %err, "placement validation failed"),
        }
    }
    Ok(())
}
