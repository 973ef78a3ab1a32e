//! Multipart upload operations

use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures_util::future::BoxFuture;
use serde_json::json;

use super::args::Args;
use super::client::{normalize, ClientFactory, Handler, S3Operation};
use super::registry::OperationRegistry;
use super::{DispatchError, Outcome, Response};

type Reply<'a> = BoxFuture<'a, Result<Outcome, DispatchError>>;

pub(super) fn register(registry: &mut OperationRegistry, clients: &Arc<ClientFactory>) {
    let ops: [(&'static str, Handler); 5] = [
        ("CreateMultipartUpload", create_multipart_upload),
        ("UploadPart", upload_part),
        ("CompleteMultipartUpload", complete_multipart_upload),
        ("AbortMultipartUpload", abort_multipart_upload),
        ("ListParts", list_parts),
    ];
    for (name, handler) in ops {
        registry.register(Arc::new(S3Operation::new(name, clients, handler)));
    }
}

fn create_multipart_upload(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let metadata = args.string_map("metadata")?;
        let mut request = client
            .create_multipart_upload()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .set_content_type(args.opt_string("content_type")?);
        if !metadata.is_empty() {
            request = request.set_metadata(Some(metadata.into_iter().collect()));
        }

        normalize(request.send().await, |out| {
            Response::new().with_data(json!({
                "bucket": out.bucket(),
                "key": out.key(),
                "upload_id": out.upload_id(),
            }))
        })
    })
}

fn upload_part(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let part_number = args.i32("part_number")?;
        let body = args.opt_bytes("body").await?.unwrap_or_default();
        let size = body.len();

        let result = client
            .upload_part()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .upload_id(args.string("upload_id")?)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await;

        normalize(result, |out| {
            Response::new()
                .header_opt("etag", out.e_tag())
                .with_data(json!({
                    "part_number": part_number,
                    "etag": out.e_tag(),
                    "size": size,
                }))
        })
    })
}

fn complete_multipart_upload(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let parts: Vec<CompletedPart> = args
            .parts("parts")?
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let result = client
            .complete_multipart_upload()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .upload_id(args.string("upload_id")?)
            .multipart_upload(upload)
            .send()
            .await;

        normalize(result, |out| {
            Response::new()
                .header_opt("etag", out.e_tag())
                .header_opt("location", out.location())
                .header_opt("x-amz-version-id", out.version_id())
                .with_data(json!({ "etag": out.e_tag(), "location": out.location() }))
        })
    })
}

fn abort_multipart_upload(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .abort_multipart_upload()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .upload_id(args.string("upload_id")?)
            .send()
            .await;
        normalize(result, |_| Response::new())
    })
}

fn list_parts(client: Client, args: Args<'_>) -> Reply<'_> {
    Box::pin(async move {
        let result = client
            .list_parts()
            .bucket(args.string("bucket")?)
            .key(args.string("key")?)
            .upload_id(args.string("upload_id")?)
            .set_max_parts(args.opt_i32("max_parts")?)
            .send()
            .await;

        normalize(result, |out| {
            let parts: Vec<_> = out
                .parts()
                .iter()
                .map(|p| json!({ "part_number": p.part_number(), "etag": p.e_tag(), "size": p.size() }))
                .collect();
            Response::new().with_data(json!({
                "parts": parts,
                "is_truncated": out.is_truncated(),
            }))
        })
    })
}
