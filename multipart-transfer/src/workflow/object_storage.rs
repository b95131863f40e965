/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use serde_json::{json, Value};

use crate::backend::{BackendRequest, BackendResponse, Parameters};
use crate::error::{self, Error};
use crate::io::PartData;
use crate::state::{PartMetadata, UploadState};
use crate::types::PartSize;
use crate::workflow::{
    ListingFields, OperationNames, PartNumberSource, PartStrategy, WorkflowPolicy,
};
use crate::MEBIBYTE;

pub(crate) const CREATE_MULTIPART_UPLOAD: &str = "CreateMultipartUpload";
pub(crate) const UPLOAD_PART: &str = "UploadPart";
pub(crate) const COMPLETE_MULTIPART_UPLOAD: &str = "CompleteMultipartUpload";
pub(crate) const ABORT_MULTIPART_UPLOAD: &str = "AbortMultipartUpload";
pub(crate) const LIST_PARTS: &str = "ListParts";

pub(crate) const BUCKET: &str = "Bucket";
pub(crate) const KEY: &str = "Key";
pub(crate) const UPLOAD_ID: &str = "UploadId";
pub(crate) const PART_NUMBER: &str = "PartNumber";
pub(crate) const ETAG: &str = "ETag";
pub(crate) const SIZE: &str = "Size";
pub(crate) const PARTS: &str = "Parts";
pub(crate) const MULTIPART_UPLOAD: &str = "MultipartUpload";
pub(crate) const PART_NUMBER_MARKER: &str = "PartNumberMarker";
pub(crate) const NEXT_PART_NUMBER_MARKER: &str = "NextPartNumberMarker";
pub(crate) const IS_TRUNCATED: &str = "IsTruncated";

/// Minimum part size for a multipart upload (except the last part)
const MIN_PART_SIZE: u64 = 5 * MEBIBYTE;
/// Maximum part size for a multipart upload
const MAX_PART_SIZE: u64 = 5 * 1024 * MEBIBYTE;
/// Maximum number of parts that a single multipart upload supports
const MAX_PARTS: u64 = 10_000;
/// Part size used when none is requested
const DEFAULT_PART_SIZE: u64 = 8 * MEBIBYTE;

/// The object storage (Amazon S3) workflow policy
pub fn policy() -> WorkflowPolicy {
    WorkflowPolicy {
        operations: OperationNames {
            initiate: CREATE_MULTIPART_UPLOAD.to_owned(),
            upload_part: UPLOAD_PART.to_owned(),
            complete: COMPLETE_MULTIPART_UPLOAD.to_owned(),
            abort: ABORT_MULTIPART_UPLOAD.to_owned(),
            list_parts: LIST_PARTS.to_owned(),
        },
        id_fields: vec![BUCKET.to_owned(), KEY.to_owned(), UPLOAD_ID.to_owned()],
        min_part_size: MIN_PART_SIZE,
        max_part_size: MAX_PART_SIZE,
        max_part_count: MAX_PARTS,
        part_number_field: Some(PART_NUMBER.to_owned()),
        part_checksum_field: ETAG.to_owned(),
        listing: ListingFields {
            parts: PARTS.to_owned(),
            part_number: PartNumberSource::Field(PART_NUMBER.to_owned()),
            size: Some(SIZE.to_owned()),
            checksum: ETAG.to_owned(),
            part_size: None,
            marker_request: PART_NUMBER_MARKER.to_owned(),
            marker_response: NEXT_PART_NUMBER_MARKER.to_owned(),
            is_truncated: Some(IS_TRUNCATED.to_owned()),
        },
    }
}

/// Parts are numbered explicitly and verified by the ETag the backend returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectStorageStrategy;

impl PartStrategy for ObjectStorageStrategy {
    fn determine_part_size(
        &self,
        policy: &WorkflowPolicy,
        requested: &PartSize,
        source_len: Option<u64>,
    ) -> Result<u64, Error> {
        let min_for_count = source_len
            .map(|len| len.div_ceil(policy.max_part_count))
            .unwrap_or_default();

        match requested {
            PartSize::Target(part_size) => {
                let part_size = *part_size;
                if part_size < policy.min_part_size || part_size > policy.max_part_size {
                    return Err(error::invalid_configuration(format!(
                        "part size {part_size} is outside of the allowed range {}..={}",
                        policy.min_part_size, policy.max_part_size
                    )));
                }
                if part_size < min_for_count {
                    return Err(error::invalid_configuration(format!(
                        "part size {part_size} would need more than {} parts",
                        policy.max_part_count
                    )));
                }
                Ok(part_size)
            }
            PartSize::Auto => {
                let part_size = DEFAULT_PART_SIZE
                    .max(min_for_count)
                    .clamp(policy.min_part_size, policy.max_part_size);
                if part_size < min_for_count {
                    return Err(error::invalid_configuration(format!(
                        "source of {} bytes is too large for {} parts",
                        source_len.unwrap_or_default(),
                        policy.max_part_count
                    )));
                }
                Ok(part_size)
            }
        }
    }

    fn part_params(
        &self,
        policy: &WorkflowPolicy,
        part: &PartData,
        params: &mut Parameters,
    ) -> Result<(), Error> {
        let field = policy.part_number_field.as_deref().unwrap_or(PART_NUMBER);
        params.insert(field.to_owned(), json!(part.part_number()));
        Ok(())
    }

    fn handle_part_result(
        &self,
        policy: &WorkflowPolicy,
        _part_size: u64,
        request: &BackendRequest,
        response: &BackendResponse,
    ) -> Result<(u64, PartMetadata), Error> {
        let field = policy.part_number_field.as_deref().unwrap_or(PART_NUMBER);
        let part_number = request.param_u64(field).ok_or_else(|| {
            error::malformed_response(format!("upload part request is missing `{field}`"))
        })?;
        let checksum = response
            .get_str(&policy.part_checksum_field)
            .ok_or_else(|| {
                error::malformed_response(format!(
                    "upload part response is missing `{}`",
                    policy.part_checksum_field
                ))
            })?;
        let size = request.body().map(|body| body.len() as u64).unwrap_or_default();
        Ok((part_number, PartMetadata::new(size, checksum)))
    }

    fn complete_params(
        &self,
        policy: &WorkflowPolicy,
        state: &UploadState,
        params: &mut Parameters,
    ) -> Result<(), Error> {
        let field = policy.part_number_field.as_deref().unwrap_or(PART_NUMBER);
        let parts = state
            .contiguous_parts()?
            .into_iter()
            .map(|(number, metadata)| {
                let mut part = Parameters::new();
                part.insert(field.to_owned(), json!(number));
                part.insert(ETAG.to_owned(), json!(metadata.checksum()));
                Value::Object(part)
            })
            .collect::<Vec<_>>();
        params.insert(MULTIPART_UPLOAD.to_owned(), json!({ (PARTS): parts }));
        Ok(())
    }
}
