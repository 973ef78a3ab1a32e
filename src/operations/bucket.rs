//! Bucket operations

use std::collections::BTreeMap;
use std::sync::Arc;

use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration,
    Tag, Tagging, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use futures_util::future::BoxFuture;
use serde_json::json;

use super::args::Args;
use super::client::{normalize, service_error, ClientFactory, Handler, S3Operation};
use super::registry::OperationRegistry;
use super::{DispatchError, Outcome, Response};

type Reply<'a> = BoxFuture<'a, Result<Outcome, DispatchError>>;

pub(super) fn register(registry: &mut OperationRegistry, clients: &Arc<ClientFactory>) {
    let ops: [(&'static str, Handler); 15] = [
        ("CreateBucket", create_bucket),
        ("DeleteBucket", delete_bucket),
        ("HeadBucket", head_bucket),
        ("ListBuckets", list_buckets),
        ("GetBucketLocation", get_bucket_location),
        ("ListObjectsV2", list_objects_v2),
        ("ListObjectVersions", list_object_versions),
        ("GetBucketVersioning", get_bucket_versioning),
        ("PutBucketVersioning", put_bucket_versioning),
        ("GetBucketTagging", get_bucket_tagging),
        ("PutBucketTagging", put_bucket_tagging),
        ("DeleteBucketTagging", delete_bucket_tagging),
        ("GetBucketPolicy", get_bucket_policy),
        ("PutBucketPolicy", put_bucket_policy),
        ("DeleteBucketPolicy", delete_bucket_policy),
    ];
    for (name, handler) in ops {
        registry.register(Arc::new(S3Operation::new(name, clients, handler)));
    }
}

/// Build a tag set from a string map
pub(super) fn tagging(
    args: &Args<'_>,
    tags: BTreeMap<String, String>,
) -> Result<Tagging, DispatchError> {
    let operation = args.operation();
    let tag_set = tags
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| DispatchError::invalid(operation, e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Tagging::builder()
        .set_tag_set(Some(tag_set))
        .build()
        .map_err(|e| DispatchError::invalid(operation, e.to_string()))
}

/// Tag list as a JSON object
pub(super) fn tags_json(tags: &[Tag]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = tags
        .iter()
        .map(|t| (t.key().to_string(), json!(t.value())))
        .collect();
    serde_json::Value::Object(map)
}

fn create_bucket(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let mut request = client.create_bucket().bucket(&bucket);

        // us-east-1 is the implicit location and must not be sent as a constraint
        if let Some(region) = args.opt_string("region")?.filter(|r| r != "us-east-1") {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }
        if let Some(acl) = args.opt_string("acl")? {
            request = request.acl(BucketCannedAcl::from(acl.as_str()));
        }

        normalize(request.send().await, |out| {
            Response::new()
                .header_opt("location", out.location())
                .with_data(json!({ "bucket": bucket, "location": out.location() }))
        })
    })
}

fn delete_bucket(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.delete_bucket().bucket(&bucket).send().await;
        normalize(result, |_| Response::new().with_data(json!({ "bucket": bucket })))
    })
}

fn head_bucket(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.head_bucket().bucket(&bucket).send().await;
        normalize(result, |out| {
            Response::new()
                .header_opt("x-amz-bucket-region", out.bucket_region())
                .with_data(json!({ "bucket": bucket, "region": out.bucket_region() }))
        })
    })
}

fn list_buckets(client: Client, _args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        normalize(client.list_buckets().send().await, |out| {
            let names: Vec<&str> = out.buckets().iter().filter_map(|b| b.name()).collect();
            Response::new().with_data(json!({
                "buckets": names,
                "owner": out.owner().and_then(|o| o.id()),
            }))
        })
    })
}

fn get_bucket_location(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.get_bucket_location().bucket(&bucket).send().await;
        normalize(result, |out| {
            let location = out
                .location_constraint()
                .map(|l| l.as_str().to_string())
                .unwrap_or_default();
            Response::new().with_data(json!({ "location_constraint": location }))
        })
    })
}

fn list_objects_v2(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let request = client
            .list_objects_v2()
            .bucket(args.string("bucket")?)
            .set_prefix(args.opt_string("prefix")?)
            .set_delimiter(args.opt_string("delimiter")?)
            .set_max_keys(args.opt_i32("max_keys")?)
            .set_continuation_token(args.opt_string("continuation_token")?)
            .set_start_after(args.opt_string("start_after")?);

        normalize(request.send().await, |out| {
            let contents: Vec<_> = out
                .contents()
                .iter()
                .map(|o| json!({ "key": o.key(), "size": o.size(), "etag": o.e_tag() }))
                .collect();
            let prefixes: Vec<&str> = out
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix())
                .collect();
            Response::new().with_data(json!({
                "contents": contents,
                "common_prefixes": prefixes,
                "key_count": out.key_count(),
                "is_truncated": out.is_truncated(),
                "next_continuation_token": out.next_continuation_token(),
            }))
        })
    })
}

fn list_object_versions(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let request = client
            .list_object_versions()
            .bucket(args.string("bucket")?)
            .set_prefix(args.opt_string("prefix")?)
            .set_delimiter(args.opt_string("delimiter")?)
            .set_key_marker(args.opt_string("key_marker")?)
            .set_version_id_marker(args.opt_string("version_id_marker")?)
            .set_max_keys(args.opt_i32("max_keys")?);

        normalize(request.send().await, |out| {
            let versions: Vec<_> = out
                .versions()
                .iter()
                .map(|v| {
                    json!({
                        "key": v.key(),
                        "version_id": v.version_id(),
                        "is_latest": v.is_latest(),
                        "size": v.size(),
                        "etag": v.e_tag(),
                    })
                })
                .collect();
            // Delete markers are needed to empty a versioned bucket
            let delete_markers: Vec<_> = out
                .delete_markers()
                .iter()
                .map(|m| {
                    json!({
                        "key": m.key(),
                        "version_id": m.version_id(),
                        "is_latest": m.is_latest(),
                    })
                })
                .collect();
            Response::new().with_data(json!({
                "versions": versions,
                "delete_markers": delete_markers,
                "is_truncated": out.is_truncated(),
                "next_key_marker": out.next_key_marker(),
                "next_version_id_marker": out.next_version_id_marker(),
            }))
        })
    })
}

fn get_bucket_versioning(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.get_bucket_versioning().bucket(&bucket).send().await;
        normalize(result, |out| {
            let status = out.status().map(|s| s.as_str().to_string());
            Response::new().with_data(json!({ "status": status }))
        })
    })
}

fn put_bucket_versioning(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let status = args.string("status")?;
        let config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::from(status.as_str()))
            .build();

        let result = client
            .put_bucket_versioning()
            .bucket(&bucket)
            .versioning_configuration(config)
            .send()
            .await;
        normalize(result, |_| Response::new().with_data(json!({ "status": status })))
    })
}

fn get_bucket_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        match client.get_bucket_tagging().bucket(&bucket).send().await {
            Ok(out) => Ok(Ok(
                Response::new().with_data(json!({ "tags": tags_json(out.tag_set()) }))
            )),
            Err(err) => {
                let err = service_error(err)?;
                // A bucket without tags answers NoSuchTagSet
                if err.code == "NoSuchTagSet" {
                    Ok(Ok(Response::new().with_data(json!({ "tags": {} }))))
                } else {
                    Ok(Err(err))
                }
            }
        }
    })
}

fn put_bucket_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let tags = args.string_map("tags")?;
        let count = tags.len();
        let tagging = tagging(&args, tags)?;

        let result = client
            .put_bucket_tagging()
            .bucket(&bucket)
            .tagging(tagging)
            .send()
            .await;
        normalize(result, |_| Response::new().with_data(json!({ "tag_count": count })))
    })
}

fn delete_bucket_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.delete_bucket_tagging().bucket(&bucket).send().await;
        normalize(result, |_| Response::new())
    })
}

fn get_bucket_policy(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.get_bucket_policy().bucket(&bucket).send().await;
        normalize(result, |out| match out.policy() {
            Some(policy) => Response::new().with_body(policy),
            None => Response::new(),
        })
    })
}

fn put_bucket_policy(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let policy = args.text("policy").await?;
        let result = client
            .put_bucket_policy()
            .bucket(&bucket)
            .policy(policy)
            .send()
            .await;
        normalize(result, |_| Response::new())
    })
}

fn delete_bucket_policy(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let result = client.delete_bucket_policy().bucket(&bucket).send().await;
        normalize(result, |_| Response::new())
    })
}
