//! AccountPool sizing controller: maintains a target inventory of
//! ready, unclaimed Accounts by computing the pool's inventory counts on
//! every trigger and, at most, creating one Account per reconcile.

use futures::stream::StreamExt;
use kube::api::{ListParams, PostParams};
use kube::runtime::{controller::Action, Controller};
use kube::{client::Client, Api, ResourceExt};
use rand::Rng;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::util::patch::patch_status;
use crate::util::{finalizer, Error, PROBE_INTERVAL};
use crate::watchers::CeilingCache;
use account_types::{Account, AccountPool, AccountState};

pub async fn run(client: Client, ceiling: CeilingCache) -> Result<(), Error> {
    info!("starting AccountPool controller");

    let crd_api: Api<AccountPool> = Api::all(client.clone());
    let context = Arc::new(ContextData { client: client.clone(), ceiling });

    Controller::new(crd_api, ListParams::default())
        .owns(Api::<Account>::all(client), ListParams::default())
        .run(reconcile, on_error, context)
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(%err, "pool reconciliation error");
            }
        })
        .await;
    Ok(())
}

struct ContextData {
    client: Client,
    ceiling: CeilingCache,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Inventory {
    pub(crate) unclaimed: i32,
    pub(crate) claimed: i32,
    pub(crate) available: i32,
    pub(crate) progressing: i32,
}

async fn reconcile(instance: Arc<AccountPool>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInputError("AccountPool resources must be namespaced".to_owned()))?;
    let name = instance.name_any();

    let accounts_api: Api<Account> = Api::namespaced(client.clone(), &namespace);
    let accounts = accounts_api.list(&ListParams::default()).await?;

    let inventory = compute_inventory(&accounts.items);
    let ceiling = context.ceiling.load();
    let total = ceiling.total;
    let aws_limit_delta = ceiling.limit - total;

    let stored = instance.status.as_ref();
    let changed = stored.map(|s| s.pool_size) != Some(Some(instance.spec.pool_size))
        || stored.and_then(|s| s.unclaimed_accounts) != Some(inventory.unclaimed)
        || stored.and_then(|s| s.claimed_accounts) != Some(inventory.claimed)
        || stored.and_then(|s| s.available_accounts) != Some(inventory.available)
        || stored.and_then(|s| s.accounts_progressing) != Some(inventory.progressing)
        || stored.and_then(|s| s.aws_limit_delta) != Some(aws_limit_delta);

    if changed {
        patch_status(client.clone(), &instance, |status| {
            status.pool_size = Some(instance.spec.pool_size);
            status.unclaimed_accounts = Some(inventory.unclaimed);
            status.claimed_accounts = Some(inventory.claimed);
            status.available_accounts = Some(inventory.available);
            status.accounts_progressing = Some(inventory.progressing);
            status.aws_limit_delta = Some(aws_limit_delta);
        })
        .await?;
        info!(%name, ?inventory, aws_limit_delta, "pool inventory updated");
    }

    if needs_new_account(&inventory, instance.spec.pool_size, total, ceiling.limit) {
        create_pool_account(&accounts_api, &instance, &name).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    Ok(Action::requeue(PROBE_INTERVAL))
}

/// `unclaimedAccounts` = pool-owned, never-claimed, not Failed.
/// `claimedAccounts` = pool-owned and ever-claimed (legal entity set).
/// `availableAccounts` = never-claimed and Ready.
/// `accountsProgressing` = in Creating or PendingVerification.
pub(crate) fn compute_inventory(accounts: &[Account]) -> Inventory {
    let mut inventory = Inventory::default();
    for account in accounts {
        if account.spec.byoc {
            continue;
        }
        let legal_entity_set = account
            .spec
            .legal_entity
            .as_ref()
            .map(|le| !le.is_empty())
            .unwrap_or(false);
        let state = account.status.as_ref().and_then(|s| s.state);

        if legal_entity_set {
            inventory.claimed += 1;
        } else if state != Some(AccountState::Failed) {
            inventory.unclaimed += 1;
        }

        if !legal_entity_set && state == Some(AccountState::Ready) {
            inventory.available += 1;
        }
        if matches!(state, Some(AccountState::Creating) | Some(AccountState::PendingVerification)) {
            inventory.progressing += 1;
        }
    }
    inventory
}

/// True when the pool is short of its target availability and the
/// account-number ceiling leaves room for one more account.
pub(crate) fn needs_new_account(inventory: &Inventory, pool_size: i32, total: i32, limit: i32) -> bool {
    inventory.available < pool_size && total + 1 <= limit
}

/// Creates exactly one new Account owned by the Pool, finalizer attached
/// up front, with a short random-suffixed name to avoid collisions.
async fn create_pool_account(
    accounts_api: &Api<Account>,
    pool: &AccountPool,
    pool_name: &str,
) -> Result<(), Error> {
    let suffix = random_suffix();
    let name = format!("{pool_name}-{suffix}");

    let account = Account {
        metadata: kube::api::ObjectMeta {
            name: Some(name.clone()),
            namespace: pool.namespace(),
            owner_references: Some(vec![pool.controller_owner_ref(&()).unwrap()]),
            finalizers: Some(vec![finalizer::FINALIZER_NAME.to_owned()]),
            ..Default::default()
        },
        ..Default::default()
    };
    accounts_api.create(&PostParams::default(), &account).await?;
    info!(account = %name, "pool created new Account");
    Ok(())
}

fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn on_error(instance: Arc<AccountPool>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!(pool = instance.name_any(), %error, "pool reconciliation error");
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_types::{AccountSpec, AccountStatus, LegalEntity};

    fn account(byoc: bool, legal_entity: Option<LegalEntity>, state: Option<AccountState>) -> Account {
        Account {
            spec: AccountSpec {
                byoc,
                legal_entity,
                ..Default::default()
            },
            status: Some(AccountStatus {
                state,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn counts_unclaimed_claimed_available_and_progressing() {
        let accounts = vec![
            account(false, None, Some(AccountState::Ready)),
            account(false, None, Some(AccountState::Creating)),
            account(
                false,
                Some(LegalEntity { id: "L1".to_owned(), name: "Acme".to_owned() }),
                Some(AccountState::Ready),
            ),
            account(false, None, Some(AccountState::Failed)),
            account(true, None, Some(AccountState::Ready)),
        ];
        let inventory = compute_inventory(&accounts);
        assert_eq!(inventory.unclaimed, 2);
        assert_eq!(inventory.claimed, 1);
        assert_eq!(inventory.available, 1);
        assert_eq!(inventory.progressing, 1);
    }

    #[test]
    fn fresh_empty_pool_needs_its_first_account() {
        let inventory = compute_inventory(&[]);
        assert!(needs_new_account(&inventory, 1, 0, 10));
    }

    #[test]
    fn satisfied_pool_does_not_grow() {
        let inventory = Inventory { available: 1, ..Default::default() };
        assert!(!needs_new_account(&inventory, 1, 0, 10));
    }

    #[test]
    fn ceiling_blocks_growth_even_when_short() {
        let inventory = Inventory::default();
        assert!(!needs_new_account(&inventory, 1, 10, 10));
    }
}
