/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::BoxError;

/// S3 implementation of [`BackendClient`]
pub mod s3;

/// Request or response fields keyed by the backend's field names.
pub type Parameters = serde_json::Map<String, Value>;

/// A single logical backend operation.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    operation: String,
    params: Parameters,
    body: Option<Bytes>,
}

impl BackendRequest {
    /// Create a new request for the named operation
    pub fn new(operation: impl Into<String>, params: Parameters) -> Self {
        Self {
            operation: operation.into(),
            params,
            body: None,
        }
    }

    /// Attach a request payload (the contents of a part)
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// The name of the operation to execute
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The request parameters
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The request payload, if any
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Returns the string parameter with the given name
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Returns the integer parameter with the given name, accepting numeric strings
    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.params.get(name).and_then(value_as_u64)
    }
}

/// Structured result of a backend operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    fields: Parameters,
}

impl BackendResponse {
    /// Create a new response from the given fields
    pub fn new(fields: Parameters) -> Self {
        Self { fields }
    }

    /// Returns the field with the given name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the string field with the given name
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns the integer field with the given name, accepting numeric strings
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(value_as_u64)
    }

    /// All response fields
    pub fn fields(&self) -> &Parameters {
        &self.fields
    }
}

impl From<Parameters> for BackendResponse {
    fn from(fields: Parameters) -> Self {
        Self::new(fields)
    }
}

/// Failure reported by a [`BackendClient`] for a single operation.
#[derive(Debug)]
pub struct BackendError {
    operation: String,
    source: BoxError,
}

impl BackendError {
    /// Create a new error for the named operation
    pub fn new<E>(operation: impl Into<String>, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            operation: operation.into(),
            source: err.into(),
        }
    }

    /// The name of the operation that failed
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend operation `{}` failed", self.operation)
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Capability for executing named backend operations.
///
/// Implementations own transport concerns: request signing, authentication, retries and
/// mapping backend error codes. The upload orchestration only relies on the operation
/// names and field names described by its [`WorkflowPolicy`](crate::workflow::WorkflowPolicy).
#[async_trait]
pub trait BackendClient: fmt::Debug + Send + Sync {
    /// Execute a single operation
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;
}

pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
