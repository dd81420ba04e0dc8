//! Total-account and credential watchers: background
//! pollers owned by the operator runtime, feeding inventory ceilings into
//! the Account and AccountPool reconcilers and flagging short-lived
//! credentials for rotation.

use crate::aws::ClientSet;
use crate::util::{patch::patch_status, Error};
use account_types::Account;
use arc_swap::ArcSwap;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Suffix identifying an STS-credentials secret subject to rotation.
const STS_CREDENTIALS_SUFFIX: &str = "-sre-credentials";

/// Validity window of an issued STS credential.
const STS_CREDENTIALS_DURATION: Duration = Duration::from_secs(60 * 60);

/// How far ahead of expiry the watcher flags a secret for rotation.
const STS_CREDENTIALS_THRESHOLD: Duration = Duration::from_secs(5 * 60);

const TOTAL_ACCOUNT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Cache of the total account count and the organization's account-number
/// limit. Consumers read a snapshot (a value copy), never a lock, keeping
/// the Account and AccountPool reconcilers' hot path contention-free.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountCeiling {
    pub total: i32,
    pub limit: i32,
}

impl AccountCeiling {
    pub fn has_capacity(&self) -> bool {
        self.total < self.limit
    }
}

/// Shared, atomically-swapped snapshot of the current ceiling.
pub type CeilingCache = Arc<ArcSwap<AccountCeiling>>;

pub fn new_ceiling_cache() -> CeilingCache {
    Arc::new(ArcSwap::from_pointee(AccountCeiling::default()))
}

/// Default organization account-number limit used until the first
/// successful poll populates a real value.
const DEFAULT_ACCOUNT_LIMIT: i32 = 10;

/// Polls `ListAccounts` at [`TOTAL_ACCOUNT_POLL_INTERVAL`] and swaps the
/// result into `cache`. Runs until the process exits.
pub async fn run_total_account_watcher(clients: ClientSet, cache: CeilingCache) {
    loop {
        match count_accounts(&clients).await {
            Ok(total) => {
                cache.store(Arc::new(AccountCeiling {
                    total,
                    limit: DEFAULT_ACCOUNT_LIMIT,
                }));
                info!(total, "total-account watcher refreshed");
            }
            Err(err) => warn!(%err, "total-account watcher poll failed"),
        }
        tokio::time::sleep(TOTAL_ACCOUNT_POLL_INTERVAL).await;
    }
}

async fn count_accounts(clients: &ClientSet) -> Result<i32, Error> {
    let mut next_token: Option<String> = None;
    let mut total = 0;
    loop {
        let mut req = clients.organizations.list_accounts();
        if let Some(token) = next_token.clone() {
            req = req.next_token(token);
        }
        let page = req.send().await.map_err(Error::aws)?;
        total += page.accounts().len() as i32;
        next_token = page.next_token;
        if next_token.is_none() {
            return Ok(total);
        }
    }
}

/// Scans secrets bearing the STS-credentials suffix and sets
/// `status.rotateCredentials` on the owning Account once a secret's age
/// exceeds `STSCredentialsDuration - STSCredentialsThreshold`.
pub async fn run_credential_watcher(client: Client, namespace: String) {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let accounts: Api<Account> = Api::namespaced(client.clone(), &namespace);
    loop {
        if let Err(err) = scan_once(&secrets, &accounts, client.clone()).await {
            warn!(%err, "credential watcher scan failed");
        }
        tokio::time::sleep(CREDENTIAL_POLL_INTERVAL).await;
    }
}

async fn scan_once(
    secrets: &Api<Secret>,
    accounts: &Api<Account>,
    client: Client,
) -> Result<(), Error> {
    let list = secrets.list(&ListParams::default()).await?;
    for secret in list.items {
        let Some(name) = secret.metadata.name.clone() else { continue };
        if !name.ends_with(STS_CREDENTIALS_SUFFIX) {
            continue;
        }
        let Some(created) = secret.metadata.creation_timestamp.as_ref() else { continue };
        let age = chrono::Utc::now() - created.0;
        let rotation_age = (STS_CREDENTIALS_DURATION - STS_CREDENTIALS_THRESHOLD).as_secs() as i64;
        if age.num_seconds() < rotation_age {
            continue;
        }
        let account_name = name.trim_end_matches(STS_CREDENTIALS_SUFFIX);
        if let Ok(account) = accounts.get(account_name).await {
            if account.status.as_ref().map(|s| s.rotate_credentials).unwrap_or(false) {
                continue;
            }
            patch_status(client.clone(), &account, |status| {
                status.rotate_credentials = true;
            })
            .await?;
            info!(account = account.name_any(), "flagged STS credentials for rotation");
        }
    }
    Ok(())
}
