/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, RequestPayer, ServerSideEncryption, StorageClass,
};
use serde_json::{json, Value};
use tracing::Instrument;

use crate::backend::{
    value_as_u64, BackendClient, BackendError, BackendRequest, BackendResponse, Parameters,
};
use crate::error::BoxError;
use crate::workflow::object_storage;

const EXPECTED_BUCKET_OWNER: &str = "ExpectedBucketOwner";
const REQUEST_PAYER: &str = "RequestPayer";

/// [`BackendClient`] that sends the object storage workflow's operations to Amazon S3.
///
/// Operation and field names follow [`object_storage::policy`]. Signing, retries and
/// error classification are handled by the wrapped SDK client.
///
/// Besides the identifiers, the following request parameters are forwarded and any
/// other parameter is ignored:
///
/// * every operation: `ExpectedBucketOwner`, `RequestPayer`
/// * `CreateMultipartUpload`: `ContentType`, `ContentEncoding`, `ContentDisposition`,
///   `ContentLanguage`, `CacheControl`, `StorageClass`, `ServerSideEncryption`,
///   `SSEKMSKeyId`
/// * `UploadPart`: `ContentMD5`, `ChecksumSHA256`
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
}

impl S3Backend {
    /// Wrap an existing S3 client
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// The Amazon S3 client instance that will be used to send requests to S3.
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }

    async fn create_multipart_upload(
        &self,
        req: &BackendRequest,
    ) -> Result<BackendResponse, BoxError> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(required_str(req, object_storage::BUCKET)?)
            .key(required_str(req, object_storage::KEY)?)
            .set_expected_bucket_owner(optional(req, EXPECTED_BUCKET_OWNER))
            .set_request_payer(optional::<RequestPayer>(req, REQUEST_PAYER))
            .set_content_type(optional(req, "ContentType"))
            .set_content_encoding(optional(req, "ContentEncoding"))
            .set_content_disposition(optional(req, "ContentDisposition"))
            .set_content_language(optional(req, "ContentLanguage"))
            .set_cache_control(optional(req, "CacheControl"))
            .set_storage_class(optional::<StorageClass>(req, "StorageClass"))
            .set_server_side_encryption(optional::<ServerSideEncryption>(
                req,
                "ServerSideEncryption",
            ))
            .set_ssekms_key_id(optional(req, "SSEKMSKeyId"))
            .send()
            .await?;

        let mut fields = Parameters::new();
        insert_opt(&mut fields, object_storage::UPLOAD_ID, resp.upload_id);
        Ok(fields.into())
    }

    async fn upload_part(&self, req: &BackendRequest) -> Result<BackendResponse, BoxError> {
        let body = req.body().cloned().unwrap_or_default();
        let part_number = req
            .param_u64(object_storage::PART_NUMBER)
            .ok_or("missing required parameter `PartNumber`")?;

        let resp = self
            .client
            .upload_part()
            .bucket(required_str(req, object_storage::BUCKET)?)
            .key(required_str(req, object_storage::KEY)?)
            .upload_id(required_str(req, object_storage::UPLOAD_ID)?)
            .part_number(i32::try_from(part_number)?)
            .content_length(i64::try_from(body.len())?)
            .set_expected_bucket_owner(optional(req, EXPECTED_BUCKET_OWNER))
            .set_request_payer(optional::<RequestPayer>(req, REQUEST_PAYER))
            .set_content_md5(optional(req, "ContentMD5"))
            .set_checksum_sha256(optional(req, "ChecksumSHA256"))
            .body(ByteStream::from(body))
            .send()
            .await?;

        let mut fields = Parameters::new();
        insert_opt(&mut fields, object_storage::ETAG, resp.e_tag);
        insert_opt(&mut fields, "ChecksumSHA256", resp.checksum_sha256);
        Ok(fields.into())
    }

    async fn complete_multipart_upload(
        &self,
        req: &BackendRequest,
    ) -> Result<BackendResponse, BoxError> {
        let parts = req
            .params()
            .get(object_storage::MULTIPART_UPLOAD)
            .and_then(|upload| upload.get(object_storage::PARTS))
            .and_then(Value::as_array)
            .ok_or("missing required parameter `MultipartUpload.Parts`")?;

        let parts = parts
            .iter()
            .map(|part| -> Result<CompletedPart, BoxError> {
                let part_number = part
                    .get(object_storage::PART_NUMBER)
                    .and_then(value_as_u64)
                    .ok_or("completed part is missing `PartNumber`")?;
                Ok(CompletedPart::builder()
                    .part_number(i32::try_from(part_number)?)
                    .set_e_tag(
                        part.get(object_storage::ETAG)
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                    )
                    .build())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(required_str(req, object_storage::BUCKET)?)
            .key(required_str(req, object_storage::KEY)?)
            .upload_id(required_str(req, object_storage::UPLOAD_ID)?)
            .set_expected_bucket_owner(optional(req, EXPECTED_BUCKET_OWNER))
            .set_request_payer(optional::<RequestPayer>(req, REQUEST_PAYER))
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;

        let mut fields = Parameters::new();
        insert_opt(&mut fields, object_storage::ETAG, resp.e_tag);
        insert_opt(&mut fields, "Location", resp.location);
        insert_opt(&mut fields, "VersionId", resp.version_id);
        Ok(fields.into())
    }

    async fn abort_multipart_upload(
        &self,
        req: &BackendRequest,
    ) -> Result<BackendResponse, BoxError> {
        self.client
            .abort_multipart_upload()
            .bucket(required_str(req, object_storage::BUCKET)?)
            .key(required_str(req, object_storage::KEY)?)
            .upload_id(required_str(req, object_storage::UPLOAD_ID)?)
            .set_expected_bucket_owner(optional(req, EXPECTED_BUCKET_OWNER))
            .set_request_payer(optional::<RequestPayer>(req, REQUEST_PAYER))
            .send()
            .await?;

        Ok(BackendResponse::default())
    }

    async fn list_parts(&self, req: &BackendRequest) -> Result<BackendResponse, BoxError> {
        let resp = self
            .client
            .list_parts()
            .bucket(required_str(req, object_storage::BUCKET)?)
            .key(required_str(req, object_storage::KEY)?)
            .upload_id(required_str(req, object_storage::UPLOAD_ID)?)
            .set_part_number_marker(optional(req, object_storage::PART_NUMBER_MARKER))
            .set_expected_bucket_owner(optional(req, EXPECTED_BUCKET_OWNER))
            .set_request_payer(optional::<RequestPayer>(req, REQUEST_PAYER))
            .send()
            .await?;

        let parts = resp
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(|part| {
                json!({
                    (object_storage::PART_NUMBER): part.part_number,
                    (object_storage::SIZE): part.size,
                    (object_storage::ETAG): part.e_tag,
                })
            })
            .collect::<Vec<_>>();

        let mut fields = Parameters::new();
        fields.insert(object_storage::PARTS.to_owned(), Value::Array(parts));
        fields.insert(
            object_storage::IS_TRUNCATED.to_owned(),
            Value::Bool(resp.is_truncated.unwrap_or(false)),
        );
        insert_opt(
            &mut fields,
            object_storage::NEXT_PART_NUMBER_MARKER,
            resp.next_part_number_marker,
        );
        Ok(fields.into())
    }
}

#[async_trait]
impl BackendClient for S3Backend {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let span = tracing::debug_span!("s3-request", operation = request.operation());
        let result = match request.operation() {
            object_storage::CREATE_MULTIPART_UPLOAD => {
                self.create_multipart_upload(&request).instrument(span).await
            }
            object_storage::UPLOAD_PART => self.upload_part(&request).instrument(span).await,
            object_storage::COMPLETE_MULTIPART_UPLOAD => {
                self.complete_multipart_upload(&request)
                    .instrument(span)
                    .await
            }
            object_storage::ABORT_MULTIPART_UPLOAD => {
                self.abort_multipart_upload(&request).instrument(span).await
            }
            object_storage::LIST_PARTS => self.list_parts(&request).instrument(span).await,
            other => Err(format!("operation `{other}` is not supported by the S3 backend").into()),
        };

        result.map_err(|err| BackendError::new(request.operation(), err))
    }
}

fn required_str<'a>(req: &'a BackendRequest, name: &str) -> Result<&'a str, BoxError> {
    req.param_str(name)
        .ok_or_else(|| format!("missing required parameter `{name}`").into())
}

fn optional<T>(req: &BackendRequest, name: &str) -> Option<T>
where
    T: for<'a> From<&'a str>,
{
    req.param_str(name).map(T::from)
}

fn insert_opt(fields: &mut Parameters, name: &str, value: Option<String>) {
    if let Some(value) = value {
        fields.insert(name.to_owned(), Value::String(value));
    }
}
