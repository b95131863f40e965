/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use multipart_transfer::backend::{
    BackendClient, BackendError, BackendRequest, BackendResponse, Parameters,
};
use serde_json::{json, Value};

/// Install a fmt subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic test data of the given size
pub fn test_data(size: usize) -> Bytes {
    (0..size)
        .map(|i| (i % 251) as u8)
        .collect::<Vec<_>>()
        .into()
}

/// Create a temporary file containing `data`
pub fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, data).unwrap();
    file
}

/// In-memory backend understanding the object storage and archive workflows.
///
/// Every request is recorded. Part transfers can be made to fail or to omit their
/// verification token, listings replay the configured pages.
#[derive(Debug)]
pub struct MockBackend {
    session_token: String,
    part_size: Mutex<Option<u64>>,
    delay: Option<Duration>,
    operation_delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<BackendRequest>>,
    part_failures: Mutex<HashMap<u64, usize>>,
    missing_tokens: Mutex<Vec<u64>>,
    corrupt_checksums: Mutex<Vec<u64>>,
    failing_operations: Mutex<Vec<String>>,
    listing_pages: Mutex<VecDeque<Value>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("upload-id")
    }
}

impl MockBackend {
    /// Create a backend that issues the given session token on initiate
    pub fn new(session_token: impl Into<String>) -> Self {
        Self {
            session_token: session_token.into(),
            part_size: Mutex::new(None),
            delay: None,
            operation_delays: Mutex::default(),
            requests: Mutex::default(),
            part_failures: Mutex::default(),
            missing_tokens: Mutex::default(),
            corrupt_checksums: Mutex::default(),
            failing_operations: Mutex::default(),
            listing_pages: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every part transfer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay every request for the named operation before it is answered
    pub fn delay_operation(&self, operation: impl Into<String>, delay: Duration) {
        self.operation_delays
            .lock()
            .unwrap()
            .insert(operation.into(), delay);
    }

    /// Part size used to derive part numbers from byte ranges when no initiate request
    /// was seen
    pub fn with_part_size(self, part_size: u64) -> Self {
        *self.part_size.lock().unwrap() = Some(part_size);
        self
    }

    /// Fail the next `times` transfers of the given part
    pub fn fail_part(&self, part_number: u64, times: usize) {
        self.part_failures
            .lock()
            .unwrap()
            .insert(part_number, times);
    }

    /// Respond to transfers of the given part without a verification token
    pub fn omit_part_token(&self, part_number: u64) {
        self.missing_tokens.lock().unwrap().push(part_number);
    }

    /// Respond to transfers of the given part with a checksum that does not match the
    /// one sent
    pub fn corrupt_part_checksum(&self, part_number: u64) {
        self.corrupt_checksums.lock().unwrap().push(part_number);
    }

    /// Fail every request for the named operation
    pub fn fail_operation(&self, operation: impl Into<String>) {
        self.failing_operations
            .lock()
            .unwrap()
            .push(operation.into());
    }

    /// Queue a page to return from the next part listing request
    pub fn push_listing_page(&self, page: Value) {
        self.listing_pages.lock().unwrap().push_back(page);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Names of the operations received, in order of arrival
    pub fn operations(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.operation().to_owned())
            .collect()
    }

    /// Requests received for the named operation
    pub fn requests_for(&self, operation: &str) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.operation() == operation)
            .collect()
    }

    /// Number of requests received for the named operation
    pub fn count(&self, operation: &str) -> usize {
        self.requests_for(operation).len()
    }

    /// Part numbers of the part transfers received, in order of arrival
    pub fn uploaded_part_numbers(&self) -> Vec<u64> {
        self.requests()
            .iter()
            .filter_map(|r| self.part_number(r))
            .collect()
    }

    /// Highest number of part transfers observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn part_number(&self, request: &BackendRequest) -> Option<u64> {
        if !matches!(request.operation(), "UploadPart" | "UploadMultipartPart") {
            return None;
        }
        if let Some(n) = request.param_u64("PartNumber") {
            return Some(n);
        }
        let range = request.param_str("range")?;
        let start: u64 = range
            .trim_start_matches("bytes ")
            .split('-')
            .next()?
            .parse()
            .ok()?;
        let part_size = (*self.part_size.lock().unwrap())?;
        Some(start / part_size + 1)
    }

    async fn upload_part(&self, request: &BackendRequest) -> Result<Parameters, BackendError> {
        let part_number = self
            .part_number(request)
            .ok_or_else(|| BackendError::new(request.operation(), "cannot identify part"))?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = match self.part_failures.lock().unwrap().get_mut(&part_number) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if fail {
            return Err(BackendError::new(
                request.operation(),
                format!("injected failure for part {part_number}"),
            ));
        }

        if self.missing_tokens.lock().unwrap().contains(&part_number) {
            return Ok(Parameters::new());
        }
        let mut fields = Parameters::new();
        fields.insert("ETag".to_owned(), json!(format!("etag-{part_number}")));
        if let Some(checksum) = request.param_str("checksum") {
            let checksum = if self.corrupt_checksums.lock().unwrap().contains(&part_number) {
                "0".repeat(checksum.len())
            } else {
                checksum.to_owned()
            };
            fields.insert("checksum".to_owned(), json!(checksum));
        }
        Ok(fields)
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        let operation = request.operation();
        let delay = self.operation_delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_operations
            .lock()
            .unwrap()
            .iter()
            .any(|op| op == operation)
        {
            return Err(BackendError::new(operation, "injected failure"));
        }

        let fields = match operation {
            "CreateMultipartUpload" | "InitiateMultipartUpload" => {
                if let Some(part_size) = request.param_u64("partSize") {
                    *self.part_size.lock().unwrap() = Some(part_size);
                }
                let mut fields = Parameters::new();
                fields.insert("UploadId".to_owned(), json!(self.session_token));
                fields.insert("uploadId".to_owned(), json!(self.session_token));
                fields
            }
            "UploadPart" | "UploadMultipartPart" => self.upload_part(&request).await?,
            "CompleteMultipartUpload" => {
                let mut fields = Parameters::new();
                fields.insert("ETag".to_owned(), json!("final-etag"));
                if let Some(checksum) = request.param_str("checksum") {
                    fields.insert("checksum".to_owned(), json!(checksum));
                }
                fields
            }
            "AbortMultipartUpload" => Parameters::new(),
            "ListParts" => {
                let page = self.listing_pages.lock().unwrap().pop_front();
                match page.as_ref().and_then(Value::as_object) {
                    Some(page) => page.clone(),
                    None => return Err(BackendError::new(operation, "no listing page queued")),
                }
            }
            other => {
                return Err(BackendError::new(
                    other,
                    format!("unsupported operation `{other}`"),
                ))
            }
        };
        Ok(BackendResponse::new(fields))
    }
}
