/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::io::{ByteSource, PartData};
use crate::state::UploadState;
use crate::types::{ConcurrencySetting, PartSize};
use crate::workflow::{Operation, Workflow};

use super::{UploadHandle, UploadInputBuilder};

/// Fluent builder for constructing a multipart upload
#[derive(Debug)]
pub struct UploadFluentBuilder {
    handle: Arc<crate::client::Handle>,
    inner: UploadInputBuilder,
}

impl UploadFluentBuilder {
    pub(crate) fn new(handle: Arc<crate::client::Handle>) -> Self {
        Self {
            handle,
            inner: ::std::default::Default::default(),
        }
    }

    /// Validate the upload and create its handle.
    ///
    /// Missing identifiers, an invalid part size or a missing body are reported here,
    /// before anything is sent. Call [`UploadHandle::upload`] to start transferring.
    #[tracing::instrument(skip_all, level = "debug", name = "initiate-upload")]
    pub fn initiate(self) -> Result<UploadHandle, Error> {
        let input = self.inner.build()?;
        crate::operation::upload::Upload::orchestrate(self.handle, input)
    }

    /// The backend workflow driving this upload. Defaults to [`Workflow::object_storage`].
    pub fn workflow(mut self, input: Workflow) -> Self {
        self.inner = self.inner.workflow(input);
        self
    }

    /// The backend workflow driving this upload.
    pub fn get_workflow(&self) -> &Option<Workflow> {
        self.inner.get_workflow()
    }

    /// Set an identifier of the upload, e.g. `Bucket` or `Key`.
    /// Every identifier of the workflow except the session token is required.
    pub fn identifier(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.identifier(name, value);
        self
    }

    /// Identifiers of the upload.
    pub fn get_identifiers(&self) -> &[(String, String)] {
        self.inner.get_identifiers()
    }

    /// The data to upload.
    /// Required.
    pub fn body(mut self, input: ByteSource) -> Self {
        self.inner = self.inner.body(input);
        self
    }

    /// The data to upload.
    pub fn set_body(mut self, input: Option<ByteSource>) -> Self {
        self.inner = self.inner.set_body(input);
        self
    }

    /// Continue an upload from a previously persisted [`UploadState`].
    pub fn state(mut self, input: UploadState) -> Self {
        self.inner = self.inner.state(input);
        self
    }

    /// Continue the upload with the given session token, rebuilding its state from the
    /// backend's part listing on first use.
    pub fn resume_session(mut self, token: impl Into<String>) -> Self {
        self.inner = self.inner.resume_session(token);
        self
    }

    /// Part size for this upload, overriding the client configuration.
    pub fn part_size(mut self, input: PartSize) -> Self {
        self.inner = self.inner.part_size(input);
        self
    }

    /// Maximum number of in-flight part transfers for this upload.
    pub fn concurrency(mut self, input: ConcurrencySetting) -> Self {
        self.inner = self.inner.concurrency(input);
        self
    }

    /// Hook invoked with every part right before it is submitted for transfer.
    pub fn before_part_upload(mut self, hook: impl Fn(&PartData) + Send + Sync + 'static) -> Self {
        self.inner = self.inner.before_part_upload(hook);
        self
    }

    /// Add an extra request parameter to every request for `operation`.
    pub fn extra_param(
        mut self,
        operation: Operation,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.inner = self.inner.extra_param(operation, name, value);
        self
    }
}

impl crate::operation::upload::input::UploadInputBuilder {
    /// Create the upload handle for this input using the given client.
    pub fn initiate_with(self, client: &crate::Client) -> Result<UploadHandle, Error> {
        let mut fluent_builder = client.upload();
        fluent_builder.inner = self;
        fluent_builder.initiate()
    }
}
