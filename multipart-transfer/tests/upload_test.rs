/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::Duration;

use multipart_transfer::backend::BackendClient;
use multipart_transfer::error::ErrorKind;
use multipart_transfer::io::ByteSource;
use multipart_transfer::operation::upload::UploadPhase;
use multipart_transfer::state::{PartMetadata, UploadState, UploadStatus};
use multipart_transfer::types::{ConcurrencySetting, PartSize};
use multipart_transfer::workflow::{Operation, Workflow};
use multipart_transfer::{Client, Config};
use serde_json::json;
use test_common::{init_tracing, temp_file, test_data, MockBackend};

const MIB: usize = 1024 * 1024;

fn client(mock: &Arc<MockBackend>, concurrency: usize) -> Client {
    let backend: Arc<dyn BackendClient> = mock.clone();
    let config = Config::builder()
        .shared_client(backend)
        .part_size(PartSize::Target(5 * MIB as u64))
        .concurrency(ConcurrencySetting::Explicit(concurrency))
        .build()
        .unwrap();
    Client::new(config)
}

#[tokio::test]
async fn test_upload_splits_source_into_parts() {
    init_tracing();
    let mock = Arc::new(MockBackend::new("upload-1").with_delay(Duration::from_millis(20)));
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "test-bucket")
        .identifier("Key", "test-key")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();
    assert_eq!(UploadPhase::Idle, handle.phase());
    assert!(mock.requests().is_empty());

    let output = handle.upload().await.unwrap();
    assert_eq!("upload-1", output.session_token());
    assert_eq!(3, output.part_count());
    assert_eq!(Some("final-etag"), output.response().get_str("ETag"));
    assert_eq!(UploadPhase::Done, handle.phase());
    assert!(mock.max_in_flight() <= 2);

    let parts = mock.requests_for("UploadPart");
    let mut sizes: Vec<_> = parts
        .iter()
        .map(|r| (r.param_u64("PartNumber").unwrap(), r.body().unwrap().len()))
        .collect();
    sizes.sort();
    assert_eq!(vec![(1, 5 * MIB), (2, 5 * MIB), (3, 2 * MIB)], sizes);
    for request in &parts {
        assert_eq!(Some("upload-1"), request.param_str("UploadId"));
        assert_eq!(Some("test-bucket"), request.param_str("Bucket"));
    }

    let complete = &mock.requests_for("CompleteMultipartUpload")[0];
    assert_eq!(
        &json!({"Parts": [
            {"PartNumber": 1, "ETag": "etag-1"},
            {"PartNumber": 2, "ETag": "etag-2"},
            {"PartNumber": 3, "ETag": "etag-3"},
        ]}),
        &complete.params()["MultipartUpload"]
    );

    let state = handle.state();
    assert!(state.is_completed());
    assert_eq!(Some(5 * MIB as u64), state.part_size());
    assert_eq!(3, state.uploaded_parts().len());
}

#[tokio::test]
async fn test_failed_part_is_retried_on_next_attempt() {
    let mock = Arc::new(MockBackend::default());
    mock.fail_part(2, 1);
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::MultipartUploadAggregateFailure, err.kind());
    let failure = err.aggregate().expect("aggregate failure");
    assert_eq!(vec![2], failure.failed_part_numbers());
    assert!(failure.state().is_initiated());
    assert!(failure.state().has_part(1));
    assert!(!failure.state().has_part(2));
    assert_eq!(UploadPhase::Failed, handle.phase());
    assert_eq!(0, mock.count("CompleteMultipartUpload"));

    let output = handle.upload().await.unwrap();
    assert_eq!(3, output.part_count());
    assert_eq!(1, mock.count("CreateMultipartUpload"));
    assert_eq!(vec![1, 2, 2, 3], mock.uploaded_part_numbers());
    assert!(handle.state().is_completed());
}

#[tokio::test]
async fn test_concurrent_retry_sends_only_missing_parts() {
    let mock = Arc::new(MockBackend::default().with_delay(Duration::from_millis(10)));
    mock.fail_part(2, 1);
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    let failure = err.aggregate().expect("aggregate failure");
    assert_eq!(vec![2], failure.failed_part_numbers());
    assert!(failure.state().has_part(1));
    let missing: Vec<u64> = (1..=3).filter(|n| !failure.state().has_part(*n)).collect();
    let sent = mock.uploaded_part_numbers().len();

    handle.upload().await.unwrap();
    let mut retried = mock.uploaded_part_numbers().split_off(sent);
    retried.sort();
    assert_eq!(missing, retried);
    assert_eq!(1, mock.count("CreateMultipartUpload"));
    assert_eq!(1, mock.count("CompleteMultipartUpload"));
    assert_eq!(3, handle.state().uploaded_parts().len());
}

#[tokio::test]
async fn test_missing_part_token_fails_part() {
    let mock = Arc::new(MockBackend::default());
    mock.omit_part_token(2);
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::MultipartUploadAggregateFailure, err.kind());
    let failure = err.aggregate().expect("aggregate failure");
    assert_eq!(vec![2], failure.failed_part_numbers());
    assert!(failure.state().has_part(1));
    assert!(!failure.state().has_part(2));
    assert_eq!(0, mock.count("CompleteMultipartUpload"));
}

#[tokio::test]
async fn test_resume_session_skips_listed_parts() {
    let mock = Arc::new(MockBackend::default());
    mock.push_listing_page(json!({
        "Parts": [
            {"PartNumber": 1, "ETag": "etag-1", "Size": 5 * MIB},
        ],
        "IsTruncated": true,
        "NextPartNumberMarker": 1,
    }));
    mock.push_listing_page(json!({
        "Parts": [
            {"PartNumber": 2, "ETag": "etag-2", "Size": 5 * MIB},
        ],
        "IsTruncated": false,
    }));
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .resume_session("existing-upload")
        .body(test_data(10 * MIB).into())
        .initiate()
        .unwrap();

    let output = handle.upload().await.unwrap();
    assert_eq!("existing-upload", output.session_token());
    assert_eq!(2, output.part_count());
    assert_eq!(
        vec!["ListParts", "ListParts", "CompleteMultipartUpload"],
        mock.operations()
    );
    let listings = mock.requests_for("ListParts");
    assert_eq!(Some("existing-upload"), listings[0].param_str("UploadId"));
    assert_eq!(Some(1), listings[1].param_u64("PartNumberMarker"));
}

#[tokio::test]
async fn test_resume_from_persisted_state() {
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock, 2);

    let mut state = UploadState::new([("Bucket", "b"), ("Key", "k")]);
    state.set_session_token("persisted").unwrap();
    state.set_part_size(5 * MIB as u64).unwrap();
    state.set_status(UploadStatus::Initiated).unwrap();
    state
        .mark_part_uploaded(1, PartMetadata::new(5 * MIB as u64, "etag-1"))
        .unwrap();

    let handle = tm
        .upload()
        .state(state)
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();
    handle.upload().await.unwrap();

    assert_eq!(0, mock.count("CreateMultipartUpload"));
    let mut uploaded = mock.uploaded_part_numbers();
    uploaded.sort();
    assert_eq!(vec![2, 3], uploaded);
}

#[tokio::test]
async fn test_finalized_upload_sends_nothing() {
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(MIB).into())
        .initiate()
        .unwrap();
    handle.upload().await.unwrap();
    let sent = mock.requests().len();

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::AlreadyFinalized, err.kind());
    assert_eq!(sent, mock.requests().len());
}

#[tokio::test]
async fn test_abort_after_failed_attempt() {
    let mock = Arc::new(MockBackend::default());
    mock.fail_part(1, 1);
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .extra_param(Operation::Abort, "ExpectedBucketOwner", "111122223333")
        .body(test_data(6 * MIB).into())
        .initiate()
        .unwrap();
    handle.upload().await.unwrap_err();

    handle.abort().await.unwrap();
    assert_eq!(UploadPhase::Aborted, handle.phase());
    assert!(handle.state().is_aborted());

    let abort = &mock.requests_for("AbortMultipartUpload")[0];
    assert_eq!(Some("upload-id"), abort.param_str("UploadId"));
    assert_eq!(Some("111122223333"), abort.param_str("ExpectedBucketOwner"));

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::AlreadyFinalized, err.kind());
}

#[tokio::test]
async fn test_abort_requires_initiated_upload() {
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(MIB).into())
        .initiate()
        .unwrap();

    let err = handle.abort().await.unwrap_err();
    assert_eq!(&ErrorKind::NotInitiated, err.kind());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_abort_while_initiating_leaves_attempt_running() {
    let mock = Arc::new(MockBackend::default());
    mock.delay_operation("CreateMultipartUpload", Duration::from_millis(200));
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(MIB).into())
        .initiate()
        .unwrap();

    let attempt = handle.upload();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(UploadPhase::Initiating, handle.phase());

    let err = handle.abort().await.unwrap_err();
    assert_eq!(&ErrorKind::NotInitiated, err.kind());
    assert!(attempt.is_pending());

    let output = attempt.await.unwrap();
    assert_eq!("upload-id", output.session_token());
    assert_eq!(1, mock.count("CreateMultipartUpload"));
    assert_eq!(0, mock.count("AbortMultipartUpload"));
    assert!(handle.state().is_completed());
}

#[tokio::test]
async fn test_abort_cancels_part_transfers() {
    let mock = Arc::new(MockBackend::default().with_delay(Duration::from_millis(200)));
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();

    let attempt = handle.upload();
    while handle.phase() != UploadPhase::TransferringParts {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.abort().await.unwrap();
    let err = attempt.await.unwrap_err();
    assert_eq!(&ErrorKind::OperationCancelled, err.kind());

    assert_eq!(UploadStatus::Aborted, handle.state().status());
    assert_eq!(UploadPhase::Aborted, handle.phase());
    assert_eq!(1, mock.count("AbortMultipartUpload"));
    assert_eq!(0, mock.count("CompleteMultipartUpload"));

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::AlreadyFinalized, err.kind());
}

#[tokio::test]
async fn test_upload_waits_for_pending_abort() {
    let mock = Arc::new(MockBackend::default());
    mock.delay_operation("AbortMultipartUpload", Duration::from_millis(100));
    let tm = client(&mock, 1);

    let mut state = UploadState::new([("Bucket", "b"), ("Key", "k")]);
    state.set_session_token("persisted").unwrap();
    state.set_status(UploadStatus::Initiated).unwrap();
    let handle = tm
        .upload()
        .state(state)
        .body(test_data(MIB).into())
        .initiate()
        .unwrap();

    let abort = handle.abort();
    assert!(abort.is_pending());
    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::AlreadyFinalized, err.kind());
    abort.await.unwrap();

    assert_eq!(vec!["AbortMultipartUpload"], mock.operations());
    assert!(handle.state().is_aborted());
}

#[tokio::test]
async fn test_concurrent_upload_calls_share_attempt() {
    let mock = Arc::new(MockBackend::default().with_delay(Duration::from_millis(50)));
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(12 * MIB).into())
        .initiate()
        .unwrap();

    let first = handle.upload();
    let second = handle.clone().upload();
    assert!(first.is_pending());
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(1, mock.count("CreateMultipartUpload"));
    assert_eq!(3, mock.count("UploadPart"));
    assert_eq!(1, mock.count("CompleteMultipartUpload"));
}

#[tokio::test]
async fn test_sequential_reader_cannot_be_retried() {
    let mock = Arc::new(MockBackend::default());
    mock.fail_part(2, 1);
    let tm = client(&mock, 1);

    let reader = std::io::Cursor::new(test_data(12 * MIB).to_vec());
    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(ByteSource::from_reader(reader))
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::MultipartUploadAggregateFailure, err.kind());

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
}

#[tokio::test]
async fn test_upload_from_file() {
    let data = test_data(7 * MIB);
    let file = temp_file(&data);
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock, 2);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(ByteSource::from_path(file.path()).unwrap())
        .initiate()
        .unwrap();
    let output = handle.upload().await.unwrap();
    assert_eq!(2, output.part_count());

    let mut parts = mock.requests_for("UploadPart");
    parts.sort_by_key(|r| r.param_u64("PartNumber"));
    let uploaded: Vec<u8> = parts
        .iter()
        .flat_map(|r| r.body().unwrap().to_vec())
        .collect();
    assert_eq!(data.to_vec(), uploaded);
}

#[tokio::test]
async fn test_failed_initiate_leaves_upload_constructing() {
    let mock = Arc::new(MockBackend::default());
    mock.fail_operation("CreateMultipartUpload");
    let tm = client(&mock, 1);

    let handle = tm
        .upload()
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .body(test_data(MIB).into())
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    assert_eq!(&ErrorKind::BackendFailure, err.kind());
    assert_eq!(
        Some("CreateMultipartUpload"),
        err.backend_error().map(|e| e.operation())
    );
    assert_eq!(UploadStatus::Constructing, handle.state().status());
    assert_eq!(UploadPhase::Failed, handle.phase());
}

#[test]
fn test_invalid_input_is_rejected_before_sending() {
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock, 1);

    let err = tm
        .upload()
        .identifier("Bucket", "b")
        .body(test_data(MIB).into())
        .initiate()
        .unwrap_err();
    assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());

    let err = tm
        .upload()
        .workflow(Workflow::object_storage())
        .identifier("Bucket", "b")
        .identifier("Key", "k")
        .part_size(PartSize::Target(MIB as u64))
        .body(test_data(MIB).into())
        .initiate()
        .unwrap_err();
    assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
    assert!(mock.requests().is_empty());
}
