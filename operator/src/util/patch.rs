use super::MANAGER_NAME;
use account_types::*;
use kube::{
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
    Api, Client, Error,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{clone::Clone, fmt::Debug};

/// Implemented by every CRD's top-level struct so [`patch_status`] can
/// reach into (and lazily initialize) its status subresource.
pub trait Object<S> {
    fn mut_status(&mut self) -> &mut S;
}

impl Object<AccountStatus> for Account {
    fn mut_status(&mut self) -> &mut AccountStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

impl Object<AccountClaimStatus> for AccountClaim {
    fn mut_status(&mut self) -> &mut AccountClaimStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

impl Object<AccountPoolStatus> for AccountPool {
    fn mut_status(&mut self) -> &mut AccountPoolStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

/// Patch the resource's status object with the provided function.
/// The function is passed a mutable reference to the status object,
/// which is to be mutated in-place. Move closures are supported.
pub async fn patch_status<
    S,
    T: Clone + Resource + Object<S> + Serialize + DeserializeOwned + Debug,
>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    Ok(api
        .patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await?)
}
