//! Cloud-provider client abstraction: a uniform typed
//! facade over organizations/IAM/STS/EC2/S3/Route53/Support/ServiceQuotas,
//! with credential acquisition from a named Kubernetes secret and an
//! `AssumeRoleProvider`-style role-assumption path.

pub mod retry;

use crate::util::Error;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client as KubeClient};

/// Loads a base [`SdkConfig`] for a named controller, either from the
/// ambient credential chain (IRSA / pod identity) or from static access
/// keys stored in a Kubernetes secret.
#[derive(Clone)]
pub struct ClientBuilder {
    kube_client: KubeClient,
    namespace: String,
}

impl ClientBuilder {
    pub fn new(kube_client: KubeClient, namespace: impl Into<String>) -> Self {
        ClientBuilder {
            kube_client,
            namespace: namespace.into(),
        }
    }

    /// Loads static credentials from the named secret's
    /// `aws_access_key_id`/`aws_secret_access_key` keys.
    async fn credentials_from_secret(&self, secret_name: &str) -> Result<Credentials, Error> {
        let api: Api<Secret> = Api::namespaced(self.kube_client.clone(), &self.namespace);
        let secret = api.get(secret_name).await?;
        let data = secret
            .data
            .ok_or_else(|| Error::UserInputError(format!("secret {secret_name} has no data")))?;
        let get = |key: &str| -> Result<String, Error> {
            data.get(key)
                .map(|b| String::from_utf8_lossy(&b.0).into_owned())
                .ok_or_else(|| {
                    Error::UserInputError(format!("secret {secret_name} missing key {key}"))
                })
        };
        Ok(Credentials::new(
            get("aws_access_key_id")?,
            get("aws_secret_access_key")?,
            data.get("aws_session_token")
                .map(|b| String::from_utf8_lossy(&b.0).into_owned()),
            None,
            "account-operator-secret",
        ))
    }

    /// Returns a [`ClientSet`] scoped to `region`, using credentials from
    /// `secret_name` if given, otherwise the ambient credential chain.
    pub async fn scoped(
        &self,
        region: &str,
        secret_name: Option<&str>,
    ) -> Result<ClientSet, Error> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_owned()));
        if let Some(secret_name) = secret_name {
            let creds = self.credentials_from_secret(secret_name).await?;
            loader = loader.credentials_provider(creds);
        }
        let config = loader.load().await;
        Ok(ClientSet::from_config(&config, region))
    }

    /// Returns a [`ClientSet`] scoped to `region` whose credentials are
    /// obtained by assuming `role_arn`, building on `base` credentials
    /// via a freshly assumed STS session.
    pub async fn assume_role(
        &self,
        region: &str,
        role_arn: &str,
        session_name: &str,
        secret_name: Option<&str>,
    ) -> Result<ClientSet, Error> {
        let base_config = match secret_name {
            Some(secret_name) => {
                let creds = self.credentials_from_secret(secret_name).await?;
                aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.to_owned()))
                    .credentials_provider(creds)
                    .load()
                    .await
            }
            None => {
                aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.to_owned()))
                    .load()
                    .await
            }
        };

        let assume_role_provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
            .configure(&base_config)
            .region(Region::new(region.to_owned()))
            .session_name(session_name)
            .build()
            .await;

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .credentials_provider(assume_role_provider)
            .load()
            .await;

        Ok(ClientSet::from_config(&config, region))
    }
}

/// A bundle of every AWS service client used anywhere in the operator,
/// scoped to a single region and credential set. Call sites never
/// construct an AWS client ad hoc.
#[derive(Clone)]
pub struct ClientSet {
    pub region: String,
    pub organizations: aws_sdk_organizations::Client,
    pub iam: aws_sdk_iam::Client,
    pub sts: aws_sdk_sts::Client,
    pub ec2: aws_sdk_ec2::Client,
    pub s3: aws_sdk_s3::Client,
    pub route53: aws_sdk_route53::Client,
    pub support: aws_sdk_support::Client,
    pub servicequotas: aws_sdk_servicequotas::Client,
}

impl ClientSet {
    fn from_config(config: &SdkConfig, region: &str) -> Self {
        ClientSet {
            region: region.to_owned(),
            organizations: aws_sdk_organizations::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
            sts: aws_sdk_sts::Client::new(config),
            ec2: aws_sdk_ec2::Client::new(config),
            s3: aws_sdk_s3::Client::new(config),
            route53: aws_sdk_route53::Client::new(config),
            support: aws_sdk_support::Client::new(config),
            servicequotas: aws_sdk_servicequotas::Client::new(config),
        }
    }

    /// Returns the caller's own ARN, used to build the BYOC role's trust
    /// policy principal.
    pub async fn operator_principal_arn(&self) -> Result<String, Error> {
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(Error::aws)?;
        identity
            .arn
            .ok_or_else(|| Error::UserInputError("GetCallerIdentity returned no arn".to_owned()))
    }
}
