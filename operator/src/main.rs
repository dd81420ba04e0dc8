use clap::{Parser, Subcommand};
use kube::client::Client;
use std::collections::HashMap;

mod accounts;
mod aws;
mod claims;
mod iam;
mod pool;
mod region_init;
mod scrub;
mod support;
mod tags;
#[cfg(test)]
mod test;
mod util;
mod validation;
mod watchers;

#[cfg(feature = "metrics")]
mod metrics;

use aws::ClientBuilder;

/// Top-level CLI configuration for the binary. Any command line
/// flags should go in here.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Prometheus metrics server scrape port. Disabled by default.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Namespace the operator's own resources (ConfigMap, CRDs) live in.
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    operator_namespace: String,

    /// Region assumed/used before a per-region client set is built.
    #[arg(long, env = "INIT_REGION", default_value = "us-east-1")]
    init_region: String,

    /// Comma-separated list of regions every account is initialized in.
    #[arg(long, env = "ACCOUNT_REGIONS", value_delimiter = ',')]
    regions: Vec<String>,

    /// Comma-separated `region=ami-id` pairs for the region-init sentinel.
    #[arg(long, env = "REGION_AMI_MAP", value_delimiter = ',')]
    region_ami_map: Vec<String>,

    /// Service Quotas quota code for the vCPU limit raised per region.
    #[arg(long, env = "QUOTA_CODE", default_value = "L-1216C47A")]
    quota_code: String,

    /// Desired vCPU quota value requested in every region.
    #[arg(long, env = "DESIRED_VCPU_QUOTA", default_value_t = 256.0)]
    desired_vcpu_quota: f64,

    /// Local part of the email address derived for pool-born accounts.
    #[arg(long, env = "EMAIL_PREFIX")]
    email_prefix: String,

    #[arg(long, env = "EMAIL_DOMAIN")]
    email_domain: String,
}

/// List of subcommands for the binary. Clap will convert the
/// name of each enum variant to kebab-case for the CLI.
/// e.g. `ManageAccounts` becomes `manage-accounts`.
#[derive(Subcommand)]
enum Command {
    ManageAccounts,
    ManagePool,
    ManageClaims,
    ValidatePlacement,
    Watch,
}

fn parse_region_ami_map(entries: &[String]) -> HashMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(region, ami)| (region.to_owned(), ami.to_owned()))
        .collect()
}

/// Secondary entrypoint that runs the appropriate subcommand.
async fn run(client: Client) {
    let cli = Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(metrics_port) = cli.metrics_port {
        tokio::spawn(metrics::run_server(metrics_port));
    }

    let builder = ClientBuilder::new(client.clone(), cli.operator_namespace.clone());
    let ceiling = watchers::new_ceiling_cache();

    match cli.command {
        Command::ManageAccounts => {
            let scoped = builder
                .scoped(&cli.init_region, None)
                .await
                .expect("failed to build initial AWS client set");
            tokio::spawn(watchers::run_total_account_watcher(scoped, ceiling.clone()));
            tokio::spawn(watchers::run_credential_watcher(
                client.clone(),
                cli.operator_namespace.clone(),
            ));

            let config = util::config::new_config_cache();
            tokio::spawn(util::config::run_config_watcher(
                client.clone(),
                cli.operator_namespace.clone(),
                config.clone(),
            ));

            let runtime = accounts::AccountsRuntimeConfig {
                init_region: cli.init_region.clone(),
                regions: cli.regions.clone(),
                region_ami_map: parse_region_ami_map(&cli.region_ami_map),
                quota_code: cli.quota_code.clone(),
                desired_vcpu_quota: cli.desired_vcpu_quota,
                email_prefix: cli.email_prefix.clone(),
                email_domain: cli.email_domain.clone(),
            };
            accounts::run(client, builder, ceiling, config, runtime).await
        }
        Command::ManagePool => pool::run(client, ceiling).await,
        Command::ManageClaims => {
            let runtime = claims::ClaimsRuntimeConfig {
                init_region: cli.init_region.clone(),
            };
            claims::run(client, builder, runtime).await
        }
        Command::ValidatePlacement => {
            validation::run(client, builder, cli.operator_namespace.clone(), cli.init_region.clone())
                .await;
            Ok(())
        }
        Command::Watch => {
            let scoped = builder
                .scoped(&cli.init_region, None)
                .await
                .expect("failed to build initial AWS client set");
            let total_account = tokio::spawn(watchers::run_total_account_watcher(scoped, ceiling));
            let credential = tokio::spawn(watchers::run_credential_watcher(
                client,
                cli.operator_namespace,
            ));
            let _ = tokio::join!(total_account, credential);
            Ok(())
        }
    }
    .unwrap();

    panic!("exited unexpectedly");
}

/// Main entrypoint that sets up the environment before running the secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Set the panic hook to exit the process with a non-zero exit code
    // when a panic occurs on any thread. This is desired behavior when
    // running in a container, as the metrics server or controller may
    // panic and we always want to restart the container in that case.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Create a kubernetes client using the default configuration.
    // In-cluster, the kubeconfig will be set by the service account.
    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    // Run the secondary entrypoint.
    run(client).await;

    // This is an unreachable branch. The controllers and metrics
    // servers should never exit without a panic.
    panic!("exited prematurely");
}
