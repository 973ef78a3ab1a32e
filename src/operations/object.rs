//! Object operations

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use aws_sdk_s3::primitives::{ByteStream, DateTime, DateTimeFormat};
use aws_sdk_s3::types::{MetadataDirective, ObjectCannedAcl};
use aws_sdk_s3::Client;
use futures_util::future::BoxFuture;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::json;

use super::args::Args;
use super::bucket::{tagging, tags_json};
use super::client::{normalize, service_error, ClientFactory, Handler, S3Operation};
use super::registry::OperationRegistry;
use super::{DispatchError, Outcome, Response};

type Reply<'a> = BoxFuture<'a, Result<Outcome, DispatchError>>;

pub(super) fn register(registry: &mut OperationRegistry, clients: &Arc<ClientFactory>) {
    let ops: [(&'static str, Handler); 8] = [
        ("PutObject", put_object),
        ("GetObject", get_object),
        ("HeadObject", head_object),
        ("DeleteObject", delete_object),
        ("CopyObject", copy_object),
        ("GetObjectTagging", get_object_tagging),
        ("PutObjectTagging", put_object_tagging),
        ("DeleteObjectTagging", delete_object_tagging),
    ];
    for (name, handler) in ops {
        registry.register(Arc::new(S3Operation::new(name, clients, handler)));
    }
}

fn http_date(value: Option<&DateTime>) -> Option<String> {
    value.and_then(|d| d.fmt(DateTimeFormat::HttpDate).ok())
}

fn user_metadata(metadata: Option<&HashMap<String, String>>) -> BTreeMap<String, String> {
    metadata
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Unreserved characters (RFC 3986) stay as-is; everything else is escaped
const TAG_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `x-amz-tagging` query string
fn tagging_header(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, TAG_ENCODE_SET),
                utf8_percent_encode(v, TAG_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn put_object(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let bucket = args.string("bucket")?;
        let key = args.string("key")?;
        let body = args.opt_bytes("body").await?.unwrap_or_default();
        let size = body.len();
        let metadata = args.string_map("metadata")?;
        let tags = args.string_map("tags")?;

        let mut request = client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .set_content_type(args.opt_string("content_type")?);
        if !metadata.is_empty() {
            request = request.set_metadata(Some(metadata.into_iter().collect()));
        }
        if !tags.is_empty() {
            request = request.tagging(tagging_header(&tags));
        }
        if let Some(acl) = args.opt_string("acl")? {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }

        normalize(request.send().await, |out| {
            Response::new()
                .header_opt("etag", out.e_tag())
                .header_opt("x-amz-version-id", out.version_id())
                .with_data(json!({
                    "bucket": bucket,
                    "key": key,
                    "size": size,
                    "etag": out.e_tag(),
                    "version_id": out.version_id(),
                }))
        })
    })
}

fn get_object(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .get_object()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .set_range(args.opt_string("range")?)
            .send()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(err) => return service_error(err).map(Err),
        };

        let response = Response::new()
            .header_opt("content-type", out.content_type())
            .header_opt("content-length", out.content_length())
            .header_opt("content-range", out.content_range())
            .header_opt("etag", out.e_tag())
            .header_opt("last-modified", http_date(out.last_modified()))
            .header_opt("x-amz-version-id", out.version_id())
            .with_metadata(user_metadata(out.metadata()));

        let bytes = out
            .body
            .collect()
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to read object body: {}", e)))?
            .into_bytes();
        let size = bytes.len();

        Ok(Ok(response
            .with_body(String::from_utf8_lossy(&bytes).into_owned())
            .with_data(json!({ "size": size }))))
    })
}

fn head_object(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .head_object()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .send()
            .await;

        normalize(result, |out| {
            Response::new()
                .header_opt("content-type", out.content_type())
                .header_opt("content-length", out.content_length())
                .header_opt("etag", out.e_tag())
                .header_opt("last-modified", http_date(out.last_modified()))
                .header_opt("x-amz-version-id", out.version_id())
                .with_metadata(user_metadata(out.metadata()))
                .with_data(json!({ "size": out.content_length() }))
        })
    })
}

fn delete_object(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .delete_object()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .send()
            .await;

        normalize(result, |out| {
            Response::new()
                .header_opt("x-amz-version-id", out.version_id())
                .header_opt("x-amz-delete-marker", out.delete_marker())
                .with_data(json!({
                    "delete_marker": out.delete_marker(),
                    "version_id": out.version_id(),
                }))
        })
    })
}

fn copy_object(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let source = format!(
            "{}/{}",
            args.string("source_bucket")?,
            args.string("source_key")?
        );
        let metadata = args.string_map("metadata")?;

        let mut request = client
            .copy_object()
            .copy_source(&source)
            .bucket(args.string("bucket")?)
            .key(args.string("key")?);
        if let Some(directive) = args.opt_string("metadata_directive")? {
            request = request.metadata_directive(MetadataDirective::from(directive.as_str()));
        }
        if !metadata.is_empty() {
            request = request.set_metadata(Some(metadata.into_iter().collect()));
        }

        normalize(request.send().await, |out| {
            let etag = out.copy_object_result().and_then(|r| r.e_tag());
            Response::new()
                .header_opt("etag", etag)
                .header_opt("x-amz-version-id", out.version_id())
                .with_data(json!({ "source": source, "etag": etag }))
        })
    })
}

fn get_object_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .get_object_tagging()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .send()
            .await;

        normalize(result, |out| {
            Response::new().with_data(json!({ "tags": tags_json(out.tag_set()) }))
        })
    })
}

fn put_object_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let tags = args.string_map("tags")?;
        let count = tags.len();
        let tagging = tagging(&args, tags)?;

        let result = client
            .put_object_tagging()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .tagging(tagging)
            .send()
            .await;
        normalize(result, |_| Response::new().with_data(json!({ "tag_count": count })))
    })
}

fn delete_object_tagging(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .delete_object_tagging()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_version_id(args.opt_string("version_id")?)
            .send()
            .await;
        normalize(result, |_| Response::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagging_header_encodes_values() {
        let tags: BTreeMap<String, String> = [
            ("env".to_string(), "qa".to_string()),
            ("team".to_string(), "storage & infra".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(tagging_header(&tags), "env=qa&team=storage%20%26%20infra");
    }

    #[test]
    fn test_tagging_header_keeps_unreserved_and_escapes_utf8() {
        let tags: BTreeMap<String, String> = [
            ("a-b_c.d~e".to_string(), "x/y=z+1".to_string()),
            ("städte".to_string(), "ok".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            tagging_header(&tags),
            "a-b_c.d~e=x%2Fy%3Dz%2B1&st%C3%A4dte=ok"
        );
    }
}
