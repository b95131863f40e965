/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Operation builders
pub mod builders;
mod input;
mod output;

mod context;
mod handle;
mod resume;
mod service;

use crate::backend::BackendRequest;
use crate::error::{self, Error, MultipartUploadFailure};
use crate::io::part_reader::PartEnumerator;
use crate::state::{UploadState, UploadStatus};
use crate::workflow::Operation;
use context::UploadContext;
pub use handle::{SharedResult, UploadHandle, UploadPhase};
/// Request type for multipart uploads
pub use input::{PartHook, UploadInput, UploadInputBuilder};
/// Response type for multipart uploads
pub use output::UploadOutput;
pub use resume::resume_state;
use service::distribute_work;
use tracing::Instrument;

use std::sync::Arc;

/// Operation struct for a multipart upload
#[derive(Clone, Default, Debug)]
pub(crate) struct Upload;

impl Upload {
    /// Validate the request and create the handle for a multipart upload.
    ///
    /// No request is sent until [`UploadHandle::upload`] or [`UploadHandle::abort`] is
    /// called.
    pub(crate) fn orchestrate(
        handle: Arc<crate::client::Handle>,
        mut input: UploadInput,
    ) -> Result<UploadHandle, Error> {
        let requested = input
            .part_size
            .take()
            .unwrap_or_else(|| handle.config.part_size().clone());
        let concurrency = handle.num_workers(input.concurrency.as_ref());
        let identifiers = std::mem::take(&mut input.identifiers);
        let (request, body, state) = input.split();

        let source =
            body.ok_or_else(|| error::invalid_configuration("an upload body is required"))?;

        let workflow = request.workflow();
        let part_size = match state.as_ref().and_then(UploadState::part_size) {
            Some(part_size) => part_size,
            None => workflow.strategy().determine_part_size(
                workflow.policy(),
                &requested,
                source.len(),
            )?,
        };

        let state = state.unwrap_or_else(|| UploadState::new(identifiers));
        tracing::debug!(
            "prepared upload ({}) with {part_size} byte parts and {concurrency} worker(s)",
            state.status()
        );

        let ctx = UploadContext::new(handle, request, state, source, part_size, concurrency);
        Ok(UploadHandle::new(ctx))
    }
}

/// Run a single upload attempt to completion
pub(crate) async fn upload_attempt(ctx: &UploadContext) -> Result<UploadOutput, Error> {
    ctx.resolve().await?;

    let status = ctx.state().status();
    if status.is_terminal() {
        return Err(error::already_finalized(status));
    }

    let part_size = {
        let mut state = ctx.state();
        match state.part_size() {
            Some(part_size) => part_size,
            None => {
                state.set_part_size(ctx.part_size)?;
                ctx.part_size
            }
        }
    };

    if status != UploadStatus::Initiated {
        ctx.set_phase(UploadPhase::Initiating);
        initiate(ctx, part_size).await?;
    }

    let source = ctx.take_source()?;
    ctx.set_phase(UploadPhase::TransferringParts);
    let uploaded = ctx.state().uploaded_part_numbers();
    tracing::debug!("{} part(s) already uploaded", uploaded.len());
    let mut parts = PartEnumerator::new(
        source,
        part_size,
        uploaded,
        ctx.workflow().strategy().part_digests(),
    );

    let failures = distribute_work(ctx, &mut parts, part_size).await;
    if !failures.is_empty() {
        let snapshot = ctx.state().clone();
        tracing::error!(
            "upload attempt failed with {} part failure(s), {} part(s) recorded",
            failures.len(),
            snapshot.uploaded_parts().len()
        );
        return Err(error::aggregate(MultipartUploadFailure::new(
            snapshot, failures,
        )));
    }

    let part_count = parts.part_count().ok_or_else(|| {
        error::incomplete_part_set("the source was not fully enumerated")
    })?;
    ctx.set_phase(UploadPhase::Completing);
    complete(ctx, part_count).await
}

async fn initiate(ctx: &UploadContext, part_size: u64) -> Result<(), Error> {
    let workflow = ctx.workflow();
    let policy = workflow.policy();
    let token_field = policy.session_token_field().ok_or_else(|| {
        error::invalid_configuration("the workflow does not name a session token field")
    })?;

    let mut params = policy.id_params(&ctx.state());
    ctx.request()
        .apply_extra_params(Operation::Initiate, &mut params);
    workflow
        .strategy()
        .initiate_params(policy, part_size, &mut params);

    let response = ctx
        .backend()
        .execute(BackendRequest::new(
            policy.operation_name(Operation::Initiate),
            params,
        ))
        .instrument(tracing::debug_span!("send-initiate"))
        .await?;

    let token = response.get_str(token_field).ok_or_else(|| {
        error::malformed_response(format!(
            "initiate response is missing the session token `{token_field}`"
        ))
    })?;

    let mut state = ctx.state();
    state.set_session_token(token)?;
    state.set_status(UploadStatus::Initiated)?;
    tracing::debug!("initiated upload {token}");
    Ok(())
}

async fn complete(ctx: &UploadContext, part_count: u64) -> Result<UploadOutput, Error> {
    let workflow = ctx.workflow();
    let policy = workflow.policy();

    let (request, part_count) = {
        let state = ctx.state();
        state.verify_part_count(part_count)?;
        let mut params = policy.id_params(&state);
        ctx.request()
            .apply_extra_params(Operation::Complete, &mut params);
        workflow
            .strategy()
            .complete_params(policy, &state, &mut params)?;
        (
            BackendRequest::new(policy.operation_name(Operation::Complete), params),
            state.uploaded_parts().len(),
        )
    };

    let response = ctx
        .backend()
        .execute(request)
        .instrument(tracing::debug_span!("send-complete", part_count))
        .await?;

    let session_token = {
        let mut state = ctx.state();
        state.set_status(UploadStatus::Completed)?;
        state.session_token().unwrap_or_default().to_owned()
    };
    ctx.set_phase(UploadPhase::Done);
    tracing::debug!("completed upload {session_token} with {part_count} part(s)");
    Ok(UploadOutput::new(session_token, part_count, response))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use crate::backend::{BackendClient, BackendError, BackendRequest, BackendResponse};
    use crate::error::ErrorKind;
    use crate::io::ByteSource;
    use crate::operation::upload::context::UploadContext;
    use crate::operation::upload::{UploadHandle, UploadPhase};
    use crate::state::{PartMetadata, UploadState, UploadStatus};
    use crate::types::{ConcurrencySetting, PartSize};
    use crate::workflow::Operation;
    use crate::{Client, Config, MEBIBYTE};

    /// Minimal in-memory object storage backend
    #[derive(Debug, Default)]
    struct FakeStore {
        requests: Mutex<Vec<BackendRequest>>,
        fail_parts: Mutex<HashMap<u64, usize>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeStore {
        fn operations(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.operation().to_owned())
                .collect()
        }

        fn count(&self, operation: &str) -> usize {
            self.operations().iter().filter(|op| *op == operation).count()
        }
    }

    #[async_trait]
    impl BackendClient for FakeStore {
        async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            let fields = match request.operation() {
                "CreateMultipartUpload" => json!({"UploadId": "upload-1"}),
                "UploadPart" => {
                    let n = request.param_u64("PartNumber").unwrap();
                    let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    self.max_in_flight.fetch_max(current, Ordering::SeqCst);
                    if let Some(delay) = self.delay {
                        tokio::time::sleep(delay).await;
                    }
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    let fail = {
                        let mut fail_parts = self.fail_parts.lock().unwrap();
                        match fail_parts.get_mut(&n) {
                            Some(remaining) if *remaining > 0 => {
                                *remaining -= 1;
                                true
                            }
                            _ => false,
                        }
                    };
                    if fail {
                        return Err(BackendError::new(request.operation(), "connection reset"));
                    }
                    json!({"ETag": format!("etag-{n}")})
                }
                "CompleteMultipartUpload" => json!({"ETag": "final"}),
                _ => json!({}),
            };
            Ok(BackendResponse::new(fields.as_object().cloned().unwrap()))
        }
    }

    fn client(store: Arc<FakeStore>, concurrency: usize) -> Client {
        let config = Config::builder()
            .shared_client(store)
            .part_size(PartSize::Target(5 * MEBIBYTE))
            .concurrency(ConcurrencySetting::Explicit(concurrency))
            .build()
            .unwrap();
        Client::new(config)
    }

    fn body(len: u64) -> ByteSource {
        ByteSource::from(Bytes::from(vec![b'x'; len as usize]))
    }

    #[tokio::test]
    async fn test_upload_respects_concurrency() {
        let store = Arc::new(FakeStore {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let handle = client(store.clone(), 2)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(body(12 * MEBIBYTE))
            .initiate()
            .unwrap();
        assert_eq!(UploadPhase::Idle, handle.phase());
        assert!(store.operations().is_empty());

        let output = handle.upload().await.unwrap();
        assert_eq!(3, output.part_count());
        assert_eq!("upload-1", output.session_token());
        assert_eq!(Some("final"), output.response().get_str("ETag"));
        assert!(store.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(UploadPhase::Done, handle.phase());
        assert_eq!(
            vec![5 * MEBIBYTE, 5 * MEBIBYTE, 2 * MEBIBYTE],
            handle
                .state()
                .ordered_parts()
                .iter()
                .map(|(_, m)| m.size())
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_failed_attempt_is_retried_with_missing_parts() {
        let store = Arc::new(FakeStore::default());
        store.fail_parts.lock().unwrap().insert(2, 1);
        let handle = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(body(12 * MEBIBYTE))
            .initiate()
            .unwrap();

        let err = handle.upload().await.unwrap_err();
        assert_eq!(&ErrorKind::MultipartUploadAggregateFailure, err.kind());
        let failure = err.aggregate().unwrap();
        assert_eq!(vec![2], failure.failed_part_numbers());
        assert!(failure.state().is_initiated());
        assert!(failure.state().has_part(1));
        assert!(!failure.state().has_part(2));
        assert_eq!(UploadPhase::Failed, handle.phase());
        assert_eq!(0, store.count("CompleteMultipartUpload"));

        handle.upload().await.unwrap();
        assert_eq!(1, store.count("CreateMultipartUpload"));
        let retried: Vec<u64> = store
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation() == "UploadPart")
            .filter_map(|r| r.param_u64("PartNumber"))
            .collect();
        // part 1 once, part 2 twice; part 3 is sent in the second attempt only
        assert_eq!(vec![1, 2, 2, 3], retried);
        assert!(handle.state().is_completed());
    }

    #[tokio::test]
    async fn test_finalized_upload_sends_nothing() {
        let store = Arc::new(FakeStore::default());
        let handle = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(body(MEBIBYTE))
            .initiate()
            .unwrap();
        handle.upload().await.unwrap();
        let sent = store.operations().len();

        let err = handle.upload().await.unwrap_err();
        assert_eq!(&ErrorKind::AlreadyFinalized, err.kind());
        assert_eq!(sent, store.operations().len());
        assert_eq!(UploadPhase::Done, handle.phase());
    }

    #[tokio::test]
    async fn test_abort_requires_initiated_upload() {
        let store = Arc::new(FakeStore::default());
        let handle = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(body(MEBIBYTE))
            .initiate()
            .unwrap();

        let err = handle.abort().await.unwrap_err();
        assert_eq!(&ErrorKind::NotInitiated, err.kind());
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_abort_initiated_state() {
        let store = Arc::new(FakeStore::default());
        let mut state = UploadState::new([("Bucket", "b"), ("Key", "k")]);
        state.set_session_token("upload-7").unwrap();
        state.set_status(UploadStatus::Initiated).unwrap();

        let handle = client(store.clone(), 1)
            .upload()
            .state(state)
            .extra_param(Operation::Abort, "ExpectedBucketOwner", "123")
            .body(body(MEBIBYTE))
            .initiate()
            .unwrap();
        handle.abort().await.unwrap();

        assert!(handle.state().is_aborted());
        assert_eq!(UploadPhase::Aborted, handle.phase());
        let requests = store.requests.lock().unwrap();
        assert_eq!(1, requests.len());
        assert_eq!("AbortMultipartUpload", requests[0].operation());
        assert_eq!(Some("upload-7"), requests[0].param_str("UploadId"));
        assert_eq!(Some("123"), requests[0].param_str("ExpectedBucketOwner"));
    }

    #[tokio::test]
    async fn test_in_flight_attempt_is_shared() {
        let store = Arc::new(FakeStore {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let handle = client(store.clone(), 2)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(body(6 * MEBIBYTE))
            .initiate()
            .unwrap();

        let first = handle.upload();
        let second = handle.clone().upload();
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(1, store.count("CreateMultipartUpload"));
        assert_eq!(2, store.count("UploadPart"));
    }

    #[tokio::test]
    async fn test_resume_from_state_skips_recorded_parts() {
        let store = Arc::new(FakeStore::default());
        let mut state = UploadState::new([("Bucket", "b"), ("Key", "k")]);
        state.set_session_token("upload-9").unwrap();
        state.set_part_size(5 * MEBIBYTE).unwrap();
        state.set_status(UploadStatus::Initiated).unwrap();
        state
            .mark_part_uploaded(1, PartMetadata::new(5 * MEBIBYTE, "etag-1"))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();
        let handle = client(store.clone(), 2)
            .upload()
            .state(state)
            .before_part_upload(move |part| hook_seen.lock().unwrap().push(part.part_number()))
            .body(body(12 * MEBIBYTE))
            .initiate()
            .unwrap();

        let output = handle.upload().await.unwrap();
        assert_eq!("upload-9", output.session_token());
        assert_eq!(3, output.part_count());
        assert_eq!(0, store.count("CreateMultipartUpload"));
        assert_eq!(vec![2, 3], *seen.lock().unwrap());
    }

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[tokio::test]
    async fn test_handle_is_send_and_debug_formats() {
        assert_send_sync::<UploadContext>();
        assert_send_sync::<UploadHandle>();

        let store = Arc::new(FakeStore::default());
        let reader = tokio_test::io::Builder::new().read(b"streamed").build();
        let handle = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .body(ByteSource::from_reader(reader))
            .initiate()
            .unwrap();

        let attempt = handle.upload();
        let debug = format!("{handle:?}");
        assert!(debug.contains("UploadHandle"), "{debug}");
        assert!(debug.contains("InFlight"), "{debug}");

        let output = attempt.await.unwrap();
        assert_eq!(1, output.part_count());
        assert_eq!(1, store.count("UploadPart"));
    }

    #[tokio::test]
    async fn test_recorded_parts_beyond_source_fail_completion() {
        let store = Arc::new(FakeStore::default());
        let mut state = UploadState::new([("Bucket", "b"), ("Key", "k")]);
        state.set_session_token("upload-3").unwrap();
        state.set_part_size(5 * MEBIBYTE).unwrap();
        state.set_status(UploadStatus::Initiated).unwrap();
        for number in 1..=3 {
            state
                .mark_part_uploaded(number, PartMetadata::new(5 * MEBIBYTE, format!("etag-{number}")))
                .unwrap();
        }

        // the source only has two parts
        let handle = client(store.clone(), 1)
            .upload()
            .state(state)
            .body(body(8 * MEBIBYTE))
            .initiate()
            .unwrap();

        let err = handle.upload().await.unwrap_err();
        assert_eq!(&ErrorKind::IncompletePartSet, err.kind());
        assert_eq!(0, store.count("UploadPart"));
        assert_eq!(0, store.count("CompleteMultipartUpload"));
        assert_eq!(UploadPhase::Failed, handle.phase());
        assert!(handle.state().is_initiated());
    }

    #[tokio::test]
    async fn test_missing_body_and_bad_part_size() {
        let store = Arc::new(FakeStore::default());
        let err = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .initiate()
            .unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());

        let err = client(store.clone(), 1)
            .upload()
            .identifier("Bucket", "b")
            .identifier("Key", "k")
            .part_size(PartSize::Target(MEBIBYTE))
            .body(body(MEBIBYTE))
            .initiate()
            .unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
        assert!(store.operations().is_empty());
    }
}
