/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use serde_json::Value;
use tracing::Instrument;

use crate::backend::{value_as_u64, BackendClient, BackendRequest, BackendResponse};
use crate::error::{self, Error};
use crate::state::{PartMetadata, UploadState, UploadStatus};
use crate::workflow::{parse_byte_range, ListingFields, Operation, PartNumberSource, Workflow};

/// Rebuild the state of an initiated upload from the backend's part listing.
///
/// Pages through the workflow's list parts operation and records every listed part. The
/// part size is taken from the listing if the backend reports it, otherwise from the size
/// of part 1. The returned state is [`UploadStatus::Initiated`].
pub async fn resume_state<K, V>(
    backend: &dyn BackendClient,
    workflow: &Workflow,
    identifiers: impl IntoIterator<Item = (K, V)>,
    session_token: impl Into<String>,
) -> Result<UploadState, Error>
where
    K: Into<String>,
    V: Into<String>,
{
    let policy = workflow.policy();
    let listing = &policy.listing;

    let mut state = UploadState::new(identifiers);
    state.set_session_token(session_token)?;
    state.set_status(UploadStatus::Initiated)?;

    let mut part_size: Option<u64> = None;
    let mut marker: Option<String> = None;
    let mut pages = 0;
    loop {
        let mut params = policy.id_params(&state);
        if let Some(marker) = &marker {
            params.insert(
                listing.marker_request.clone(),
                Value::String(marker.clone()),
            );
        }
        let request = BackendRequest::new(policy.operation_name(Operation::ListParts), params);
        let response = backend
            .execute(request)
            .instrument(tracing::debug_span!("send-list-parts", page = pages))
            .await?;
        pages += 1;

        if part_size.is_none() {
            part_size = listing
                .part_size
                .as_deref()
                .and_then(|field| response.get_u64(field));
        }

        for part in listed_parts(listing, &response)? {
            let (part_number, size) = listed_part_number(listing, part, part_size)?;
            let checksum = part
                .get(&listing.checksum)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    error::malformed_response(format!(
                        "listed part {part_number} has no `{}`",
                        listing.checksum
                    ))
                })?;
            if part_number == 1 && part_size.is_none() {
                part_size = Some(size);
            }
            state.mark_part_uploaded(part_number, PartMetadata::new(size, checksum))?;
        }

        let next_marker = response.get(&listing.marker_response).and_then(marker_value);
        let truncated = match &listing.is_truncated {
            Some(field) => response
                .get(field)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            None => next_marker.is_some(),
        };
        if !truncated {
            break;
        }
        match next_marker {
            Some(next) if marker.as_ref() != Some(&next) => marker = Some(next),
            Some(next) => {
                return Err(error::malformed_response(format!(
                    "part listing returned the same marker `{next}` twice"
                )))
            }
            None => {
                return Err(error::malformed_response(format!(
                    "truncated part listing has no `{}`",
                    listing.marker_response
                )))
            }
        }
    }

    if let Some(part_size) = part_size {
        state.set_part_size(part_size)?;
    }
    tracing::debug!(
        "rebuilt upload state from {pages} listing page(s): {} part(s) uploaded",
        state.uploaded_parts().len()
    );
    Ok(state)
}

fn listed_parts<'a>(
    listing: &ListingFields,
    response: &'a BackendResponse,
) -> Result<&'a [Value], Error> {
    match response.get(&listing.parts) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(parts)) => Ok(parts.as_slice()),
        Some(_) => Err(error::malformed_response(format!(
            "`{}` in the part listing is not a list",
            listing.parts
        ))),
    }
}

/// Returns the part number and size of a listed part
fn listed_part_number(
    listing: &ListingFields,
    part: &Value,
    part_size: Option<u64>,
) -> Result<(u64, u64), Error> {
    let listed_size = listing
        .size
        .as_deref()
        .and_then(|field| part.get(field))
        .and_then(value_as_u64);

    match &listing.part_number {
        PartNumberSource::Field(field) => {
            let part_number = part.get(field).and_then(value_as_u64).ok_or_else(|| {
                error::malformed_response(format!("listed part has no valid `{field}`"))
            })?;
            let size = listed_size.ok_or_else(|| {
                error::malformed_response(format!("listed part {part_number} has no size"))
            })?;
            Ok((part_number, size))
        }
        PartNumberSource::ByteRange(field) => {
            let (start, end) = part
                .get(field)
                .and_then(Value::as_str)
                .and_then(parse_byte_range)
                .ok_or_else(|| {
                    error::malformed_response(format!("listed part has no valid `{field}`"))
                })?;
            let part_size = part_size.ok_or_else(|| {
                error::malformed_response("part listing does not report the part size")
            })?;
            if start % part_size != 0 {
                return Err(error::malformed_response(format!(
                    "listed range starting at {start} is not aligned to the part size {part_size}"
                )));
            }
            Ok((
                start / part_size + 1,
                listed_size.unwrap_or(end - start + 1),
            ))
        }
    }
}

fn marker_value(value: &Value) -> Option<String> {
    match value {
        Value::String(marker) if !marker.is_empty() => Some(marker.clone()),
        Value::Number(marker) => Some(marker.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::resume_state;
    use crate::backend::{BackendClient, BackendError, BackendRequest, BackendResponse};
    use crate::error::ErrorKind;
    use crate::workflow::Workflow;

    /// Replays listing pages, recording the requests it receives
    #[derive(Debug, Default)]
    struct Pages {
        pages: Mutex<Vec<serde_json::Value>>,
        requests: Mutex<Vec<BackendRequest>>,
    }

    impl Pages {
        fn new(pages: Vec<serde_json::Value>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                requests: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl BackendClient for Pages {
        async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.pages.lock().unwrap().pop() {
                Some(page) => Ok(BackendResponse::new(page.as_object().cloned().unwrap())),
                None => Err(BackendError::new(request.operation(), "no more pages")),
            }
        }
    }

    #[tokio::test]
    async fn test_object_storage_listing_pages() {
        let backend = Pages::new(vec![
            json!({
                "Parts": [
                    {"PartNumber": 1, "Size": 5242880, "ETag": "e1"},
                    {"PartNumber": 2, "Size": 5242880, "ETag": "e2"},
                ],
                "IsTruncated": true,
                "NextPartNumberMarker": "2",
            }),
            json!({
                "Parts": [{"PartNumber": 4, "Size": 10, "ETag": "e4"}],
                "IsTruncated": false,
            }),
        ]);

        let state = resume_state(
            &backend,
            &Workflow::object_storage(),
            [("Bucket", "b"), ("Key", "k")],
            "upload-1",
        )
        .await
        .unwrap();

        assert!(state.is_initiated());
        assert_eq!(Some("upload-1"), state.session_token());
        assert_eq!(Some(5242880), state.part_size());
        assert_eq!(
            vec![1, 2, 4],
            state
                .ordered_parts()
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
        );
        assert_eq!("e4", state.uploaded_parts()[&4].checksum());

        let requests = backend.requests.lock().unwrap();
        assert_eq!(2, requests.len());
        assert_eq!("ListParts", requests[0].operation());
        assert_eq!(Some("upload-1"), requests[0].param_str("UploadId"));
        assert_eq!(None, requests[0].param_str("PartNumberMarker"));
        assert_eq!(Some("2"), requests[1].param_str("PartNumberMarker"));
    }

    #[tokio::test]
    async fn test_archive_listing_by_range() {
        let backend = Pages::new(vec![
            json!({
                "PartSizeInBytes": 1048576,
                "Parts": [
                    {"RangeInBytes": "0-1048575", "SHA256TreeHash": "aa"},
                ],
                "Marker": "next",
            }),
            json!({
                "PartSizeInBytes": 1048576,
                "Parts": [
                    {"RangeInBytes": "2097152-2097161", "SHA256TreeHash": "cc"},
                ],
                "Marker": null,
            }),
        ]);

        let state = resume_state(
            &backend,
            &Workflow::archive(),
            [("accountId", "-"), ("vaultName", "v")],
            "archive-upload",
        )
        .await
        .unwrap();

        assert_eq!(Some(1048576), state.part_size());
        assert_eq!(1048576, state.uploaded_parts()[&1].size());
        assert_eq!(10, state.uploaded_parts()[&3].size());
        assert!(!state.has_part(2));

        let requests = backend.requests.lock().unwrap();
        assert_eq!(Some("archive-upload"), requests[0].param_str("uploadId"));
        assert_eq!(Some("next"), requests[1].param_str("marker"));
    }

    #[tokio::test]
    async fn test_listing_failures() {
        let backend = Pages::new(vec![json!({"Parts": [{"PartNumber": 1, "Size": 1}]})]);
        let err = resume_state(
            &backend,
            &Workflow::object_storage(),
            [("Bucket", "b"), ("Key", "k")],
            "u",
        )
        .await
        .unwrap_err();
        assert_eq!(&ErrorKind::MalformedResponse, err.kind());

        let backend = Pages::new(vec![]);
        let err = resume_state(
            &backend,
            &Workflow::object_storage(),
            [("Bucket", "b"), ("Key", "k")],
            "u",
        )
        .await
        .unwrap_err();
        assert_eq!(&ErrorKind::BackendFailure, err.kind());
        assert_eq!("ListParts", err.backend_error().unwrap().operation());

        let backend = Pages::new(vec![json!({"Parts": [], "IsTruncated": true})]);
        let err = resume_state(
            &backend,
            &Workflow::object_storage(),
            [("Bucket", "b"), ("Key", "k")],
            "u",
        )
        .await
        .unwrap_err();
        assert_eq!(&ErrorKind::MalformedResponse, err.kind());
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let backend = Pages::new(vec![json!({"IsTruncated": false})]);
        let state = resume_state(
            &backend,
            &Workflow::object_storage(),
            [("Bucket", "b"), ("Key", "k")],
            "u",
        )
        .await
        .unwrap();
        assert!(state.is_initiated());
        assert!(state.uploaded_parts().is_empty());
        assert_eq!(None, state.part_size());
    }
}
