/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use multipart_transfer::backend::BackendClient;
use multipart_transfer::checksum::{DigestKind, TreeHash};
use multipart_transfer::error::ErrorKind;
use multipart_transfer::types::{ConcurrencySetting, PartSize};
use multipart_transfer::workflow::Workflow;
use multipart_transfer::{Client, Config};
use serde_json::json;
use test_common::{init_tracing, test_data, MockBackend};

const MIB: usize = 1024 * 1024;

fn client(mock: &Arc<MockBackend>) -> Client {
    let backend: Arc<dyn BackendClient> = mock.clone();
    let config = Config::builder()
        .shared_client(backend)
        .concurrency(ConcurrencySetting::Explicit(2))
        .build()
        .unwrap();
    Client::new(config)
}

#[tokio::test]
async fn test_archive_upload_sends_tree_hashes() {
    init_tracing();
    let data = test_data(3 * MIB + 100);
    let mock = Arc::new(MockBackend::new("archive-upload"));
    let tm = client(&mock);

    let handle = tm
        .upload()
        .workflow(Workflow::archive())
        .identifier("accountId", "-")
        .identifier("vaultName", "photos")
        .part_size(PartSize::Target(MIB as u64))
        .body(data.clone().into())
        .initiate()
        .unwrap();
    let output = handle.upload().await.unwrap();
    assert_eq!("archive-upload", output.session_token());
    assert_eq!(4, output.part_count());

    let initiate = &mock.requests_for("InitiateMultipartUpload")[0];
    assert_eq!(Some(MIB as u64), initiate.param_u64("partSize"));
    assert_eq!(Some("photos"), initiate.param_str("vaultName"));

    let parts = mock.requests_for("UploadMultipartPart");
    let ranges: Vec<_> = parts
        .iter()
        .map(|r| r.param_str("range").unwrap().to_owned())
        .collect();
    assert_eq!(4, ranges.len());
    assert!(ranges.contains(&"bytes 0-1048575/*".to_owned()));
    assert!(ranges.contains(&format!("bytes {}-{}/*", 3 * MIB, 3 * MIB + 99)));
    for part in &parts {
        let body = part.body().unwrap();
        assert_eq!(
            Some(hex::encode(TreeHash::digest(body)).as_str()),
            part.param_str("checksum")
        );
        assert_eq!(
            Some(hex::encode(DigestKind::Sha256.digest(body)).as_str()),
            part.param_str("ContentSHA256")
        );
    }

    let complete = &mock.requests_for("CompleteMultipartUpload")[0];
    assert_eq!(Some("archive-upload"), complete.param_str("uploadId"));
    assert_eq!(&json!((3 * MIB + 100).to_string()), &complete.params()["archiveSize"]);
    assert_eq!(
        Some(hex::encode(TreeHash::digest(&data)).as_str()),
        complete.param_str("checksum")
    );
    assert!(handle.state().is_completed());
}

#[tokio::test]
async fn test_archive_checksum_mismatch_fails_part() {
    let mock = Arc::new(MockBackend::default());
    mock.corrupt_part_checksum(2);
    let tm = client(&mock);

    let handle = tm
        .upload()
        .workflow(Workflow::archive())
        .identifier("accountId", "-")
        .identifier("vaultName", "v")
        .part_size(PartSize::Target(MIB as u64))
        .body(test_data(3 * MIB).into())
        .initiate()
        .unwrap();

    let err = handle.upload().await.unwrap_err();
    let failure = err.aggregate().expect("aggregate failure");
    assert_eq!(vec![2], failure.failed_part_numbers());
    assert!(!failure.state().has_part(2));
    assert_eq!(0, mock.count("CompleteMultipartUpload"));
}

#[tokio::test]
async fn test_archive_resume_session_by_range() {
    let data = test_data(2 * MIB);
    let first = &data[..MIB];
    let mock = Arc::new(MockBackend::default().with_part_size(MIB as u64));
    mock.push_listing_page(json!({
        "Parts": [
            {"RangeInBytes": format!("0-{}", MIB - 1), "SHA256TreeHash": hex::encode(TreeHash::digest(first))},
        ],
        "PartSizeInBytes": MIB,
        "Marker": null,
    }));
    let tm = client(&mock);

    let handle = tm
        .upload()
        .workflow(Workflow::archive())
        .identifier("accountId", "-")
        .identifier("vaultName", "v")
        .resume_session("archive-session")
        .body(data.clone().into())
        .initiate()
        .unwrap();
    let output = handle.upload().await.unwrap();
    assert_eq!(2, output.part_count());

    assert_eq!(0, mock.count("InitiateMultipartUpload"));
    assert_eq!(vec![2], mock.uploaded_part_numbers());
    let complete = &mock.requests_for("CompleteMultipartUpload")[0];
    assert_eq!(
        Some(hex::encode(TreeHash::digest(&data)).as_str()),
        complete.param_str("checksum")
    );
}

#[test]
fn test_archive_rejects_unaligned_part_size() {
    let mock = Arc::new(MockBackend::default());
    let tm = client(&mock);

    let err = tm
        .upload()
        .workflow(Workflow::archive())
        .identifier("accountId", "-")
        .identifier("vaultName", "v")
        .part_size(PartSize::Target(3 * MIB as u64))
        .body(test_data(MIB).into())
        .initiate()
        .unwrap_err();
    assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
}
