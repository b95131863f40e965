/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{BackendRequest, BackendResponse, Parameters};
use crate::checksum::DigestKind;
use crate::error::Error;
use crate::io::PartData;
use crate::state::{PartMetadata, UploadState};
use crate::types::PartSize;

/// Amazon Glacier style archive uploads
pub mod archive;

/// Amazon S3 style object uploads
pub mod object_storage;

/// The logical operations of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Start a new upload session
    Initiate,
    /// Transfer a single part
    UploadPart,
    /// Assemble the uploaded parts
    Complete,
    /// Discard the upload session and its parts
    Abort,
    /// List the parts of an upload session
    ListParts,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initiate => "initiate",
            Operation::UploadPart => "upload-part",
            Operation::Complete => "complete",
            Operation::Abort => "abort",
            Operation::ListParts => "list-parts",
        };
        f.write_str(name)
    }
}

/// Backend operation names for each [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationNames {
    /// Operation starting an upload session
    pub initiate: String,
    /// Operation transferring a single part
    pub upload_part: String,
    /// Operation assembling the uploaded parts
    pub complete: String,
    /// Operation discarding an upload session
    pub abort: String,
    /// Operation listing the parts of an upload session
    pub list_parts: String,
}

/// Where the part number of a listed part comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartNumberSource {
    /// The part number is given by the named field
    Field(String),
    /// The part number is derived from the byte range in the named field and the part size
    ByteRange(String),
}

/// Field mapping of a paginated part listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFields {
    /// Field holding the array of listed parts
    pub parts: String,
    /// How to determine the number of each listed part
    pub part_number: PartNumberSource,
    /// Field holding the size of each listed part, if the backend reports one
    pub size: Option<String>,
    /// Field holding the verification token of each listed part
    pub checksum: String,
    /// Field holding the upload's part size, if the backend reports one
    pub part_size: Option<String>,
    /// Request field carrying the pagination marker
    pub marker_request: String,
    /// Response field holding the marker for the next page
    pub marker_response: String,
    /// Response field flagging more pages. Without one, listing continues while a marker is returned.
    pub is_truncated: Option<String>,
}

/// Backend configuration as data.
///
/// Describes operation names, identifier fields, part size limits and the names of the
/// fields the orchestration reads from backend responses. Workflow specific request
/// construction lives in a [`PartStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Backend operation names
    pub operations: OperationNames,
    /// Ordered identifier field names. The last one holds the upload session token.
    pub id_fields: Vec<String>,
    /// Smallest part size the backend accepts (the last part may be smaller)
    pub min_part_size: u64,
    /// Largest part size the backend accepts
    pub max_part_size: u64,
    /// Maximum number of parts in a single upload
    pub max_part_count: u64,
    /// Request field carrying the part number, if the backend numbers parts explicitly
    pub part_number_field: Option<String>,
    /// Response field holding the verification token of an uploaded part
    pub part_checksum_field: String,
    /// Field mapping of the part listing
    pub listing: ListingFields,
}

impl WorkflowPolicy {
    /// The backend operation name for the given operation
    pub fn operation_name(&self, operation: Operation) -> &str {
        match operation {
            Operation::Initiate => &self.operations.initiate,
            Operation::UploadPart => &self.operations.upload_part,
            Operation::Complete => &self.operations.complete,
            Operation::Abort => &self.operations.abort,
            Operation::ListParts => &self.operations.list_parts,
        }
    }

    /// The identifier fields supplied by the caller (every field except the session token)
    pub fn caller_id_fields(&self) -> &[String] {
        match self.id_fields.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// The field holding the upload session token
    pub fn session_token_field(&self) -> Option<&str> {
        self.id_fields.last().map(String::as_str)
    }

    /// Request parameters identifying the upload (identifiers plus session token, if set)
    pub(crate) fn id_params(&self, state: &UploadState) -> Parameters {
        let mut params = Parameters::new();
        for (name, value) in state.id() {
            params.insert(name.clone(), Value::String(value.clone()));
        }
        if let (Some(field), Some(token)) = (self.session_token_field(), state.session_token()) {
            params.insert(field.to_owned(), Value::String(token.to_owned()));
        }
        params
    }
}

/// Workflow specific part sizing and part request construction.
///
/// Implementations must be pure with respect to their inputs; the orchestrator may call
/// them from several tasks concurrently.
pub trait PartStrategy: fmt::Debug + Send + Sync {
    /// Digests that must be computed for each part before it is sent
    fn part_digests(&self) -> &[DigestKind] {
        &[]
    }

    /// Resolve the part size for a source of the given length (if known)
    fn determine_part_size(
        &self,
        policy: &WorkflowPolicy,
        requested: &PartSize,
        source_len: Option<u64>,
    ) -> Result<u64, Error>;

    /// Add workflow specific parameters to the initiate request
    fn initiate_params(&self, _policy: &WorkflowPolicy, _part_size: u64, _params: &mut Parameters) {
    }

    /// Add the part specific parameters (part number or range, checksums) to an upload
    /// part request
    fn part_params(
        &self,
        policy: &WorkflowPolicy,
        part: &PartData,
        params: &mut Parameters,
    ) -> Result<(), Error>;

    /// Interpret the backend's response to an upload part request.
    ///
    /// Returns the part number and the metadata to record. A response without the
    /// expected verification token is an error.
    fn handle_part_result(
        &self,
        policy: &WorkflowPolicy,
        part_size: u64,
        request: &BackendRequest,
        response: &BackendResponse,
    ) -> Result<(u64, PartMetadata), Error>;

    /// Add the parameters describing the uploaded parts to the complete request
    fn complete_params(
        &self,
        policy: &WorkflowPolicy,
        state: &UploadState,
        params: &mut Parameters,
    ) -> Result<(), Error>;
}

/// A backend workflow: its [`WorkflowPolicy`] and [`PartStrategy`].
#[derive(Debug, Clone)]
pub struct Workflow {
    policy: Arc<WorkflowPolicy>,
    strategy: Arc<dyn PartStrategy>,
}

impl Workflow {
    /// Create a workflow from a policy and strategy
    pub fn new(policy: WorkflowPolicy, strategy: impl PartStrategy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
            strategy: Arc::new(strategy),
        }
    }

    /// Amazon S3 style multipart object uploads
    pub fn object_storage() -> Self {
        Self::new(object_storage::policy(), object_storage::ObjectStorageStrategy)
    }

    /// Amazon Glacier style multipart archive uploads
    pub fn archive() -> Self {
        Self::new(archive::policy(), archive::ArchiveStrategy)
    }

    /// The workflow's policy
    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// The workflow's part strategy
    pub fn strategy(&self) -> &dyn PartStrategy {
        self.strategy.as_ref()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::object_storage()
    }
}

/// Parse a byte range of the form `bytes a-b/*`, `bytes a-b` or `a-b` into inclusive bounds
pub(crate) fn parse_byte_range(range: &str) -> Option<(u64, u64)> {
    let range = range.trim();
    let range = range.strip_prefix("bytes").unwrap_or(range).trim_start();
    let range = range.split('/').next()?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    (start <= end).then_some((start, end))
}
