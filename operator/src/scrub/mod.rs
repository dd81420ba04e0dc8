//! Reuse scrubber: scours a released account of
//! consumer artifacts so it may serve a new claim. One worker per
//! resource class, joined rather than short-circuited — the aggregate
//! outcome is "clean" only if every class reported success.

use crate::aws::retry::with_retry;
use crate::aws::ClientSet;
use crate::iam;
use crate::util::Error;
use aws_sdk_ec2::error::ProvideErrorMetadata as _;

/// Result of one scrub worker.
pub struct ScrubOutcome {
    pub class: &'static str,
    pub result: Result<(), Error>,
}

/// Runs every scrub class in parallel against `clients` and returns once
/// all have finished. A worker's error is surfaced but
/// never short-circuits the others.
pub async fn scrub_account(clients: &ClientSet) -> Vec<ScrubOutcome> {
    let (snapshots, volumes, buckets, route53) = tokio::join!(
        scrub_snapshots(clients),
        scrub_volumes(clients),
        scrub_buckets(clients),
        scrub_route53(clients),
    );
    vec![
        ScrubOutcome { class: "snapshots", result: snapshots },
        ScrubOutcome { class: "volumes", result: volumes },
        ScrubOutcome { class: "buckets", result: buckets },
        ScrubOutcome { class: "route53", result: route53 },
    ]
}

/// True only if every worker in `outcomes` succeeded.
pub fn is_clean(outcomes: &[ScrubOutcome]) -> bool {
    outcomes.iter().all(|o| o.result.is_ok())
}

async fn scrub_snapshots(clients: &ClientSet) -> Result<(), Error> {
    let described = with_retry(
        || clients.ec2.describe_snapshots().owner_ids("self").send(),
        |e| e.code().map(str::to_owned),
    )
    .await
    .map_err(Error::aws)?;
    for snapshot in described.snapshots() {
        if let Some(id) = snapshot.snapshot_id() {
            match with_retry(
                || clients.ec2.delete_snapshot().snapshot_id(id).send(),
                |e| e.code().map(str::to_owned),
            )
            .await
            {
                Ok(_) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => return Err(Error::aws(err)),
            }
        }
    }
    Ok(())
}

async fn scrub_volumes(clients: &ClientSet) -> Result<(), Error> {
    let described = with_retry(|| clients.ec2.describe_volumes().send(), |e| e.code().map(str::to_owned))
        .await
        .map_err(Error::aws)?;
    for volume in described.volumes() {
        if let Some(id) = volume.volume_id() {
            match with_retry(
                || clients.ec2.delete_volume().volume_id(id).send(),
                |e| e.code().map(str::to_owned),
            )
            .await
            {
                Ok(_) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => return Err(Error::aws(err)),
            }
        }
    }
    Ok(())
}

async fn scrub_buckets(clients: &ClientSet) -> Result<(), Error> {
    let listed = with_retry(|| clients.s3.list_buckets().send(), |e| e.code().map(str::to_owned))
        .await
        .map_err(Error::aws)?;
    for bucket in listed.buckets() {
        let Some(name) = bucket.name() else { continue };
        empty_bucket(clients, name).await?;
        match with_retry(
            || clients.s3.delete_bucket().bucket(name).send(),
            |e| e.code().map(str::to_owned),
        )
        .await
        {
            Ok(_) => {}
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(Error::aws(err)),
        }
    }
    Ok(())
}

async fn empty_bucket(clients: &ClientSet, bucket: &str) -> Result<(), Error> {
    let mut continuation_token = None;
    loop {
        let token_for_request = continuation_token.clone();
        let result = with_retry(
            || {
                let mut req = clients.s3.list_objects_v2().bucket(bucket);
                if let Some(token) = token_for_request.clone() {
                    req = req.continuation_token(token);
                }
                req.send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await;
        let page = match result {
            Ok(page) => page,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(Error::aws(err)),
        };
        let keys: Vec<_> = page
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .unwrap()
            })
            .collect();
        if !keys.is_empty() {
            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(keys))
                .build()
                .unwrap();
            with_retry(
                || clients.s3.delete_objects().bucket(bucket).delete(delete.clone()).send(),
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
        continuation_token = page.next_continuation_token().map(str::to_owned);
        if continuation_token.is_none() {
            return Ok(());
        }
    }
}

/// Deletes every record set except `NS`/`SOA` in every hosted zone, then
/// deletes the zone itself.
async fn scrub_route53(clients: &ClientSet) -> Result<(), Error> {
    let mut marker: Option<String> = None;
    loop {
        let marker_for_request = marker.clone();
        let page = with_retry(
            || {
                let mut req = clients.route53.list_hosted_zones();
                if let Some(marker) = marker_for_request.clone() {
                    req = req.marker(marker);
                }
                req.send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        for zone in page.hosted_zones() {
            scrub_zone_records(clients, zone.id()).await?;
            with_retry(
                || clients.route53.delete_hosted_zone().id(zone.id()).send(),
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
        if page.is_truncated {
            marker = page.next_marker;
        } else {
            return Ok(());
        }
    }
}

async fn scrub_zone_records(clients: &ClientSet, zone_id: &str) -> Result<(), Error> {
    let mut start_name: Option<String> = None;
    loop {
        let start_name_for_request = start_name.clone();
        let page = with_retry(
            || {
                let mut req = clients.route53.list_resource_record_sets().hosted_zone_id(zone_id);
                if let Some(name) = start_name_for_request.clone() {
                    req = req.start_record_name(name);
                }
                req.send()
            },
            |e| e.code().map(str::to_owned),
        )
        .await
        .map_err(Error::aws)?;
        let deletions: Vec<_> = page
            .resource_record_sets()
            .iter()
            .filter(|r| {
                !matches!(
                    r.r#type(),
                    aws_sdk_route53::types::RrType::Ns | aws_sdk_route53::types::RrType::Soa
                )
            })
            .cloned()
            .collect();
        if !deletions.is_empty() {
            let changes: Vec<_> = deletions
                .into_iter()
                .map(|rrset| {
                    aws_sdk_route53::types::Change::builder()
                        .action(aws_sdk_route53::types::ChangeAction::Delete)
                        .resource_record_set(rrset)
                        .build()
                        .unwrap()
                })
                .collect();
            let batch = aws_sdk_route53::types::ChangeBatch::builder()
                .set_changes(Some(changes))
                .build()
                .map_err(Error::aws)?;
            with_retry(
                || {
                    clients
                        .route53
                        .change_resource_record_sets()
                        .hosted_zone_id(zone_id)
                        .change_batch(batch.clone())
                        .send()
                },
                |e| e.code().map(str::to_owned),
            )
            .await
            .map_err(Error::aws)?;
        }
        if page.is_truncated {
            start_name = page.next_record_name;
        } else {
            return Ok(());
        }
    }
}

fn is_not_found<E: aws_sdk_ec2::error::ProvideErrorMetadata>(err: &E) -> bool {
    matches!(
        err.code(),
        Some("InvalidSnapshot.NotFound")
            | Some("InvalidVolume.NotFound")
            | Some("NoSuchBucket")
            | Some("NoSuchEntity")
    )
}

/// For CCS (BYOC) teardown, an additional IAM cleanup runs synchronously
/// before the per-class scrub, restricted to the account/namespace tag
/// pair.
pub async fn scrub_byoc_iam(
    clients: &ClientSet,
    account_name: &str,
    namespace: &str,
) -> Result<(), Error> {
    iam::clean_up_iam(clients, account_name, namespace).await
}
