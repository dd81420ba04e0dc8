use account_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    fs::create_dir_all("../crds").unwrap();
    fs::write(
        "../crds/accounts.cloudtenant.io_account_crd.yaml",
        serde_yaml::to_string(&Account::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/accounts.cloudtenant.io_accountclaim_crd.yaml",
        serde_yaml::to_string(&AccountClaim::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/accounts.cloudtenant.io_accountpool_crd.yaml",
        serde_yaml::to_string(&AccountPool::crd()).unwrap(),
    )
    .unwrap();
}
