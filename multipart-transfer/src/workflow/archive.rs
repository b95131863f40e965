/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use serde_json::{json, Value};

use crate::backend::{BackendRequest, BackendResponse, Parameters};
use crate::checksum::{DigestKind, TreeHash};
use crate::error::{self, Error, ErrorKind};
use crate::io::PartData;
use crate::state::{PartMetadata, UploadState};
use crate::types::PartSize;
use crate::workflow::{
    parse_byte_range, ListingFields, OperationNames, PartNumberSource, PartStrategy,
    WorkflowPolicy,
};
use crate::MEBIBYTE;

const INITIATE_MULTIPART_UPLOAD: &str = "InitiateMultipartUpload";
const UPLOAD_MULTIPART_PART: &str = "UploadMultipartPart";
const COMPLETE_MULTIPART_UPLOAD: &str = "CompleteMultipartUpload";
const ABORT_MULTIPART_UPLOAD: &str = "AbortMultipartUpload";
const LIST_PARTS: &str = "ListParts";

const ACCOUNT_ID: &str = "accountId";
const VAULT_NAME: &str = "vaultName";
const UPLOAD_ID: &str = "uploadId";
const RANGE: &str = "range";
const CHECKSUM: &str = "checksum";
const CONTENT_SHA256: &str = "ContentSHA256";
const PART_SIZE: &str = "partSize";
const ARCHIVE_SIZE: &str = "archiveSize";

const MIN_PART_SIZE: u64 = MEBIBYTE;
const MAX_PART_SIZE: u64 = 4 * 1024 * MEBIBYTE;
const MAX_PARTS: u64 = 10_000;

const DIGESTS: &[DigestKind] = &[DigestKind::TreeHash, DigestKind::Sha256];

/// The archive (Amazon Glacier) workflow policy
pub fn policy() -> WorkflowPolicy {
    WorkflowPolicy {
        operations: OperationNames {
            initiate: INITIATE_MULTIPART_UPLOAD.to_owned(),
            upload_part: UPLOAD_MULTIPART_PART.to_owned(),
            complete: COMPLETE_MULTIPART_UPLOAD.to_owned(),
            abort: ABORT_MULTIPART_UPLOAD.to_owned(),
            list_parts: LIST_PARTS.to_owned(),
        },
        id_fields: vec![
            ACCOUNT_ID.to_owned(),
            VAULT_NAME.to_owned(),
            UPLOAD_ID.to_owned(),
        ],
        min_part_size: MIN_PART_SIZE,
        max_part_size: MAX_PART_SIZE,
        max_part_count: MAX_PARTS,
        part_number_field: None,
        part_checksum_field: CHECKSUM.to_owned(),
        listing: ListingFields {
            parts: "Parts".to_owned(),
            part_number: PartNumberSource::ByteRange("RangeInBytes".to_owned()),
            size: None,
            checksum: "SHA256TreeHash".to_owned(),
            part_size: Some("PartSizeInBytes".to_owned()),
            marker_request: "marker".to_owned(),
            marker_response: "Marker".to_owned(),
            is_truncated: None,
        },
    }
}

/// Every part size the policy accepts: the minimum part size doubled until the maximum.
pub fn valid_part_sizes(policy: &WorkflowPolicy) -> Vec<u64> {
    let mut sizes = Vec::new();
    let mut size = policy.min_part_size;
    while size > 0 && size <= policy.max_part_size {
        sizes.push(size);
        size = match size.checked_mul(2) {
            Some(next) => next,
            None => break,
        };
    }
    sizes
}

/// Parts are addressed by byte range and verified by their SHA-256 tree hash.
///
/// Part sizes must be 1 MiB multiplied by a power of two so that the per-part tree
/// hashes combine into the tree hash of the whole archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStrategy;

impl PartStrategy for ArchiveStrategy {
    fn part_digests(&self) -> &[DigestKind] {
        DIGESTS
    }

    fn determine_part_size(
        &self,
        policy: &WorkflowPolicy,
        requested: &PartSize,
        source_len: Option<u64>,
    ) -> Result<u64, Error> {
        let sizes = valid_part_sizes(policy);
        let fits = |size: u64| {
            source_len
                .map(|len| len.div_ceil(size) <= policy.max_part_count)
                .unwrap_or(true)
        };

        match requested {
            PartSize::Target(part_size) => {
                if !sizes.contains(part_size) {
                    return Err(error::invalid_configuration(format!(
                        "part size {part_size} must be {} bytes multiplied by a power of two, at most {} bytes",
                        policy.min_part_size, policy.max_part_size
                    )));
                }
                if !fits(*part_size) {
                    return Err(error::invalid_configuration(format!(
                        "part size {part_size} would need more than {} parts",
                        policy.max_part_count
                    )));
                }
                Ok(*part_size)
            }
            PartSize::Auto => sizes.into_iter().find(|size| fits(*size)).ok_or_else(|| {
                error::invalid_configuration(format!(
                    "source of {} bytes is too large for {} parts",
                    source_len.unwrap_or_default(),
                    policy.max_part_count
                ))
            }),
        }
    }

    fn initiate_params(&self, _policy: &WorkflowPolicy, part_size: u64, params: &mut Parameters) {
        params.insert(PART_SIZE.to_owned(), json!(part_size.to_string()));
    }

    fn part_params(
        &self,
        _policy: &WorkflowPolicy,
        part: &PartData,
        params: &mut Parameters,
    ) -> Result<(), Error> {
        let start = part.offset();
        let end = start + part.len().saturating_sub(1);
        params.insert(RANGE.to_owned(), json!(format!("bytes {start}-{end}/*")));

        for (field, kind) in [
            (CHECKSUM, DigestKind::TreeHash),
            (CONTENT_SHA256, DigestKind::Sha256),
        ] {
            let digest = part.digests().hex(kind).ok_or_else(|| {
                Error::new(
                    ErrorKind::RuntimeError,
                    format!(
                        "{kind} digest of part {} was not computed",
                        part.part_number()
                    ),
                )
            })?;
            params.insert(field.to_owned(), Value::String(digest));
        }
        Ok(())
    }

    fn handle_part_result(
        &self,
        policy: &WorkflowPolicy,
        part_size: u64,
        request: &BackendRequest,
        response: &BackendResponse,
    ) -> Result<(u64, PartMetadata), Error> {
        let (start, _) = request
            .param_str(RANGE)
            .and_then(parse_byte_range)
            .ok_or_else(|| {
                error::malformed_response("upload part request has no valid `range`")
            })?;
        if part_size == 0 || start % part_size != 0 {
            return Err(error::malformed_response(format!(
                "range starting at {start} is not aligned to the part size {part_size}"
            )));
        }
        let part_number = start / part_size + 1;

        let sent = request.param_str(CHECKSUM);
        let returned = response.get_str(&policy.part_checksum_field);
        let checksum = match (sent, returned) {
            (Some(sent), Some(returned)) if sent.eq_ignore_ascii_case(returned) => returned,
            (_, None) => {
                return Err(error::malformed_response(format!(
                    "upload part response is missing `{}`",
                    policy.part_checksum_field
                )))
            }
            (sent, Some(returned)) => {
                return Err(error::malformed_response(format!(
                    "checksum mismatch for part {part_number}: sent {}, backend computed {returned}",
                    sent.unwrap_or("nothing")
                )))
            }
        };

        let size = request
            .body()
            .map(|body| body.len() as u64)
            .unwrap_or_default();
        Ok((part_number, PartMetadata::new(size, checksum)))
    }

    fn complete_params(
        &self,
        _policy: &WorkflowPolicy,
        state: &UploadState,
        params: &mut Parameters,
    ) -> Result<(), Error> {
        let mut archive_size = 0;
        let mut tree_hash = TreeHash::new();
        for (_, metadata) in state.contiguous_parts()? {
            archive_size += metadata.size();
            tree_hash.add_checksum_hex(metadata.checksum())?;
        }
        params.insert(ARCHIVE_SIZE.to_owned(), json!(archive_size.to_string()));
        params.insert(
            CHECKSUM.to_owned(),
            Value::String(hex::encode(tree_hash.complete())),
        );
        Ok(())
    }
}
