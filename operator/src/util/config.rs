use super::Error;
use arc_swap::ArcSwap;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Name of the ConfigMap this operator reads its tunables from.
pub const CONFIG_MAP_NAME: &str = "account-operator-config";

/// Operator-wide settings sourced from the `account-operator-config`
/// ConfigMap. Re-read on a timer by the caller and swapped into an
/// `arc_swap::ArcSwap` so reconcilers always observe the latest snapshot
/// without taking a lock.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Feature flag gating the placement controller's `MoveAccount`
    /// OU-placement correction.
    pub feature_validation_move_account: bool,

    /// Feature flag gating the placement controller's owner-tag
    /// verification/correction.
    pub feature_validation_tag_account: bool,

    /// Identifies which operator instance owns a shard of accounts, used
    /// to scope list operations when multiple operators share a region.
    pub shard_name: String,

    /// Organizational-unit id accounts are expected to live under; the
    /// placement controller walks `ListParents` against this value.
    pub root: String,

    /// vCPU quota requested per region during account initialization.
    /// Overrides the CLI-supplied default when present, letting the
    /// quota be tuned without a redeploy.
    pub quota_vcpu: Option<f64>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            feature_validation_move_account: false,
            feature_validation_tag_account: false,
            shard_name: String::new(),
            root: String::new(),
            quota_vcpu: None,
        }
    }
}

impl OperatorConfig {
    fn from_data(data: &BTreeMap<String, String>) -> Result<Self, Error> {
        let feature_validation_move_account = data
            .get("feature.validation_move_account")
            .map(|v| v == "true")
            .unwrap_or(false);
        let feature_validation_tag_account = data
            .get("feature.validation_tag_account")
            .map(|v| v == "true")
            .unwrap_or(false);
        let shard_name = data.get("shard-name").cloned().unwrap_or_default();
        let root = data.get("root").cloned().unwrap_or_default();
        let quota_vcpu = data.get("quota.vcpu").and_then(|v| v.parse::<f64>().ok());
        Ok(OperatorConfig {
            feature_validation_move_account,
            feature_validation_tag_account,
            shard_name,
            root,
            quota_vcpu,
        })
    }

    /// Reads the current `account-operator-config` ConfigMap from the
    /// operator's own namespace.
    pub async fn load(client: Client, namespace: &str) -> Result<Self, Error> {
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        let cm = api.get(CONFIG_MAP_NAME).await?;
        match cm.data {
            Some(data) => Self::from_data(&data),
            None => Ok(OperatorConfig::default()),
        }
    }
}

/// Shared, atomically-swapped snapshot of the operator's ConfigMap.
pub type ConfigCache = Arc<ArcSwap<OperatorConfig>>;

pub fn new_config_cache() -> ConfigCache {
    Arc::new(ArcSwap::from_pointee(OperatorConfig::default()))
}

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Polls `account-operator-config` at [`CONFIG_POLL_INTERVAL`] and swaps
/// the result into `cache`. Runs until the process exits.
pub async fn run_config_watcher(client: Client, namespace: String, cache: ConfigCache) {
    loop {
        match OperatorConfig::load(client.clone(), &namespace).await {
            Ok(config) => cache.store(Arc::new(config)),
            Err(err) => warn!(%err, "config watcher failed to load operator config"),
        }
        tokio::time::sleep(CONFIG_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_defaults_the_rest() {
        let mut data = BTreeMap::new();
        data.insert("feature.validation_move_account".to_owned(), "true".to_owned());
        data.insert("root".to_owned(), "ou-root-1234".to_owned());
        let cfg = OperatorConfig::from_data(&data).unwrap();
        assert!(cfg.feature_validation_move_account);
        assert!(!cfg.feature_validation_tag_account);
        assert_eq!(cfg.root, "ou-root-1234");
        assert_eq!(cfg.shard_name, "");
        assert_eq!(cfg.quota_vcpu, None);
    }

    #[test]
    fn defaults_unset_feature_flags_to_false() {
        let cfg = OperatorConfig::from_data(&BTreeMap::new()).unwrap();
        assert!(!cfg.feature_validation_move_account);
        assert!(!cfg.feature_validation_tag_account);
    }

    #[test]
    fn parses_quota_vcpu_when_present() {
        let mut data = BTreeMap::new();
        data.insert("quota.vcpu".to_owned(), "512".to_owned());
        let cfg = OperatorConfig::from_data(&data).unwrap();
        assert_eq!(cfg.quota_vcpu, Some(512.0));
    }

    #[test]
    fn ignores_unparseable_quota_vcpu() {
        let mut data = BTreeMap::new();
        data.insert("quota.vcpu".to_owned(), "not-a-number".to_owned());
        let cfg = OperatorConfig::from_data(&data).unwrap();
        assert_eq!(cfg.quota_vcpu, None);
    }
}
