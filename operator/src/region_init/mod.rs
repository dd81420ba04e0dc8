//! Region-init pipeline: forces per-region capacity
//! activation and requests a vCPU quota increase, fanning out one worker
//! per region and joining the results on a channel, a genuine
//! per-unit-of-work fan-out within a single reconcile.

use crate::aws::retry::with_retry;
use crate::aws::ClientBuilder;
use crate::tags::TagSet;
use crate::util::Error;
use account_types::Account;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{Filter, InstanceStateName};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Instance type used for the sentinel.
const SENTINEL_INSTANCE_TYPE: &str = "t2.micro";
const SENTINEL_VOLUME_SIZE_GIB: i32 = 10;
const SENTINEL_MAX_WAIT: Duration = Duration::from_secs(10 * 60);
const QUOTA_SERVICE_CODE: &str = "ec2";

/// Per-region input for one region-init worker.
pub struct RegionJob {
    pub region: String,
    pub role_arn: String,
    pub session_name: String,
    pub ami_id: String,
    pub quota_code: String,
    pub desired_vcpu_quota: f64,
    pub kms_key_id: Option<String>,
}

/// Outcome of one region's worker. Workers never mutate the Account
/// resource; the owning reconciler reads this vector once and writes a
/// single status patch.
#[derive(Debug)]
pub struct RegionOutcome {
    pub region: String,
    pub result: Result<(), String>,
}

/// Fans out one worker per region and blocks until every worker reports.
/// Worker errors are logged and collected, never propagated to the
/// caller — the subsystem prefers partial success over total retry.
pub async fn initialize_supported_regions(
    builder: &ClientBuilder,
    account: &Account,
    tags: &TagSet,
    jobs: Vec<RegionJob>,
) -> Vec<RegionOutcome> {
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let builder_region = job.region.clone();
        let tags = tags.clone();
        let clients = builder.assume_role(&job.region, &job.role_arn, &job.session_name, None).await;
        handles.push(async move {
            let result = match clients {
                Ok(clients) => run_region(&clients, &job, &tags).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(ref msg) = result {
                warn!(region = %builder_region, error = %msg, "region-init worker failed");
            }
            RegionOutcome {
                region: builder_region,
                result,
            }
        });
    }
    let _ = account;
    futures::future::join_all(handles).await
}

async fn run_region(
    clients: &crate::aws::ClientSet,
    job: &RegionJob,
    tags: &TagSet,
) -> Result<(), Error> {
    if already_initialized(clients, tags).await? {
        debug!(region = %job.region, "region already initialized, sentinel found and terminated");
        return Ok(());
    }

    request_quota_increase_if_needed(clients, job).await?;
    run_sentinel(clients, job, tags).await
}

/// Clean-region probe: enumerate running sentinel instances tagged with
/// the operator's tag set; terminate any found and, if any were found,
/// treat the region as already initialized.
async fn already_initialized(clients: &crate::aws::ClientSet, tags: &TagSet) -> Result<bool, Error> {
    let probe = with_retry(
        || clients.ec2.describe_instances().dry_run(true).send(),
        |e| e.code().map(str::to_owned),
    )
    .await;
    if let Err(err) = probe {
        if err.code() == Some("AuthFailure") {
            return Err(Error::UserInputError(format!(
                "region aborted: AuthFailure on dry-run DescribeInstances: {err}"
            )));
        }
        // DryRunOperation is the expected "success" response to a dry run.
    }

    let described = with_retry(
        || {
            clients
                .ec2
                .describe_instances()
                .filters(
                    Filter::builder()
                        .name("tag:Name")
                        .values(&tags.name)
                        .build(),
                )
                .filters(
                    Filter::builder()
                        .name("instance-state-name")
                        .values("running")
                        .build(),
                )
                .filters(
                    Filter::builder()
                        .name("instance-type")
                        .values(SENTINEL_INSTANCE_TYPE)
                        .build(),
                )
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;

    let mut found = false;
    for reservation in described.reservations() {
        for instance in reservation.instances() {
            if let Some(id) = instance.instance_id() {
                found = true;
                with_retry(
                    || clients.ec2.terminate_instances().instance_ids(id).send(),
                    |e| e.code().map(str::to_owned),
                )
                .await
                .map_err(Error::aws)?;
            }
        }
    }
    Ok(found)
}

/// Reads the desired vCPU quota, requests an increase if under target,
/// deduplicating against quota-change history.
async fn request_quota_increase_if_needed(
    clients: &crate::aws::ClientSet,
    job: &RegionJob,
) -> Result<(), Error> {
    if job.desired_vcpu_quota == 0.0 {
        return Ok(());
    }

    let current = with_retry(
        || {
            clients
                .servicequotas
                .get_service_quota()
                .service_code(QUOTA_SERVICE_CODE)
                .quota_code(&job.quota_code)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    let current_value = current.quota.and_then(|q| q.value).unwrap_or(0.0);
    if current_value >= job.desired_vcpu_quota {
        return Ok(());
    }

    if has_matching_pending_request(clients, job).await? {
        return Ok(());
    }

    let result = with_retry(
        || {
            clients
                .servicequotas
                .request_service_quota_increase()
                .service_code(QUOTA_SERVICE_CODE)
                .quota_code(&job.quota_code)
                .desired_value(job.desired_vcpu_quota)
                .send()
        },
        |e| e.code().map(str::to_owned),
    )
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.code() == Some("ResourceAlreadyExistsException") => Ok(()),
        Err(err) => Err(Error::aws(err)),
    }
}

/// Paginated search through `ListRequestedServiceQuotaChangeHistoryByQuota`
/// for a prior request with the same service code, quota code, and
/// desired value.
async fn has_matching_pending_request(
    clients: &crate::aws::ClientSet,
    job: &RegionJob,
) -> Result<bool, Error> {
    let mut next_token: Option<String> = None;
    loop {
        let token_for_request = next_token.clone();
        let page = with_retry(
            || {
                let mut req = clients
                    .servicequotas
                    .list_requested_service_quota_change_history_by_quota()
                    .service_code(QUOTA_SERVICE_CODE)
                    .quota_code(&job.quota_code);
                if let Some(token) = token_for_request.clone() {
                    req = req.next_token(token);
                }
                req.send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        if page
            .requested_quotas()
            .iter()
            .any(|change| matches_desired_value(change, job.desired_vcpu_quota))
        {
            return Ok(true);
        }
        next_token = page.next_token;
        if next_token.is_none() {
            return Ok(false);
        }
    }
}

/// True if a prior quota-change request already asked for the same
/// desired value, making a new `RequestServiceQuotaIncrease` redundant.
pub(crate) fn matches_desired_value(
    change: &aws_sdk_servicequotas::types::RequestedServiceQuotaChange,
    desired_vcpu_quota: f64,
) -> bool {
    change.desired_value == Some(desired_vcpu_quota)
}

/// Creates a sentinel instance, waits for it to reach `running` (state
/// code 16), then terminates it unconditionally.
async fn run_sentinel(
    clients: &crate::aws::ClientSet,
    job: &RegionJob,
    tags: &TagSet,
) -> Result<(), Error> {
    let instance_id = create_sentinel_with_retry(clients, job, tags).await?;
    let poll_result = poll_until_running(clients, &instance_id).await;
    // Terminate unconditionally, whether the poll succeeded or not.
    let terminate_result = with_retry(
        || clients.ec2.terminate_instances().instance_ids(&instance_id).send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws);
    poll_result?;
    terminate_result?;
    Ok(())
}

/// Creates the sentinel instance, retrying on `PendingVerification`/
/// `OptInRequired` with exponential doubling up to [`SENTINEL_MAX_WAIT`].
async fn create_sentinel_with_retry(
    clients: &crate::aws::ClientSet,
    job: &RegionJob,
    tags: &TagSet,
) -> Result<String, Error> {
    let mut delay = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    loop {
        let result = with_retry(
            || {
                let block_device = aws_sdk_ec2::types::BlockDeviceMapping::builder()
                    .device_name("/dev/xvda")
                    .ebs(
                        aws_sdk_ec2::types::EbsBlockDevice::builder()
                            .volume_size(SENTINEL_VOLUME_SIZE_GIB)
                            .encrypted(true)
                            .set_kms_key_id(job.kms_key_id.clone())
                            .build(),
                    )
                    .build();

                let tag_spec_instance = aws_sdk_ec2::types::TagSpecification::builder()
                    .resource_type(aws_sdk_ec2::types::ResourceType::Instance)
                    .set_tags(Some(tags.to_ec2_tags()))
                    .build();
                let tag_spec_volume = aws_sdk_ec2::types::TagSpecification::builder()
                    .resource_type(aws_sdk_ec2::types::ResourceType::Volume)
                    .set_tags(Some(tags.to_ec2_tags()))
                    .build();

                clients
                    .ec2
                    .run_instances()
                    .image_id(&job.ami_id)
                    .instance_type(SENTINEL_INSTANCE_TYPE.into())
                    .min_count(1)
                    .max_count(1)
                    .block_device_mappings(block_device)
                    .tag_specifications(tag_spec_instance)
                    .tag_specifications(tag_spec_volume)
                    .send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await;

        match result {
            Ok(output) => {
                let instance_id = output
                    .instances()
                    .first()
                    .and_then(|i| i.instance_id())
                    .ok_or_else(|| {
                        Error::UserInputError("RunInstances returned no instance".to_owned())
                    })?
                    .to_owned();
                return Ok(instance_id);
            }
            Err(err)
                if matches!(err.code(), Some("PendingVerification") | Some("OptInRequired"))
                    && waited < SENTINEL_MAX_WAIT =>
            {
                sleep(delay).await;
                waited += delay;
                delay *= 2;
            }
            Err(err) => return Err(Error::aws(err)),
        }
    }
}

/// Polls `DescribeInstanceStatus` with exponential doubling until the
/// instance reaches the `running` state (state code 16).
async fn poll_until_running(
    clients: &crate::aws::ClientSet,
    instance_id: &str,
) -> Result<(), Error> {
    let mut delay = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    loop {
        let status = with_retry(
            || {
                clients
                    .ec2
                    .describe_instance_status()
                    .instance_ids(instance_id)
                    .include_all_instances(true)
                    .send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        let state = status
            .instance_statuses()
            .first()
            .and_then(|s| s.instance_state())
            .and_then(|s| s.name());
        if state == Some(&InstanceStateName::Running) {
            return Ok(());
        }
        if waited >= SENTINEL_MAX_WAIT {
            return Err(Error::UserInputError(format!(
                "sentinel instance {instance_id} did not reach running within the wait budget"
            )));
        }
        sleep(delay).await;
        waited += delay;
        delay *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_wait_budget_is_ten_minutes() {
        assert_eq!(SENTINEL_MAX_WAIT, Duration::from_secs(600));
    }

    #[test]
    fn matches_desired_value_requires_exact_equality() {
        let change = aws_sdk_servicequotas::types::RequestedServiceQuotaChange::builder()
            .desired_value(256.0)
            .build();
        assert!(matches_desired_value(&change, 256.0));
        assert!(!matches_desired_value(&change, 512.0));
    }
}
