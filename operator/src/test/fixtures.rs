//! Plain struct builders for the scenario tests in this module tree.
//! None of these touch a `kube::Client` or the network, so the whole
//! suite runs without a kubeconfig.

use account_types::{
    Account, AccountClaim, AccountClaimSpec, AccountSpec, AccountState, AccountStatus,
    AwsClaimSpec, Condition, LegalEntity, SecretRef,
};
use kube::api::ObjectMeta;

pub fn legal_entity(id: &str) -> LegalEntity {
    LegalEntity { id: id.to_owned(), name: id.to_owned() }
}

/// A bare Account, optionally Ready/Creating/etc, with no legal entity
/// and no claim — the shape a freshly pool-created account starts from.
pub fn test_account(name: &str, namespace: &str) -> Account {
    Account {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        spec: AccountSpec::default(),
        status: Some(AccountStatus::default()),
    }
}

pub fn with_state(mut account: Account, state: AccountState) -> Account {
    account.status.get_or_insert_with(AccountStatus::default).state = Some(state);
    account
}

pub fn with_legal_entity(mut account: Account, id: &str) -> Account {
    account.spec.legal_entity = Some(legal_entity(id));
    account
}

pub fn with_creating_condition_probed(mut account: Account, ago: chrono::Duration) -> Account {
    let probe = (chrono::Utc::now() - ago).to_rfc3339();
    let status = account.status.get_or_insert_with(AccountStatus::default);
    account_types::upsert_condition(
        &mut status.conditions,
        Condition::new(account_types::condition_types::CREATING, "True"),
    );
    status.conditions[0].last_probe_time = Some(probe);
    account
}

pub fn test_claim(name: &str, namespace: &str) -> AccountClaim {
    AccountClaim {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        spec: AccountClaimSpec {
            legal_entity: LegalEntity::default(),
            aws: AwsClaimSpec { regions: vec!["us-east-1".to_owned()] },
            ..Default::default()
        },
        status: None,
    }
}

pub fn byoc_claim(name: &str, namespace: &str, aws_account_id: &str) -> AccountClaim {
    let mut claim = test_claim(name, namespace);
    claim.spec.byoc = true;
    claim.spec.byoc_aws_account_id = Some(aws_account_id.to_owned());
    claim.spec.byoc_secret_ref = Some(SecretRef { name: "byoc-creds".to_owned(), namespace: None });
    claim
}
