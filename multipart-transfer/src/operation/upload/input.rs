/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::Parameters;
use crate::error::{self, Error};
use crate::io::{ByteSource, PartData};
use crate::state::UploadState;
use crate::types::{ConcurrencySetting, PartSize};
use crate::workflow::{Operation, Workflow};

/// Callback invoked with every part right before it is submitted for transfer.
pub type PartHook = Arc<dyn Fn(&PartData) + Send + Sync>;

/// Input type for a multipart upload
#[non_exhaustive]
pub struct UploadInput {
    /// The backend workflow driving this upload.
    pub workflow: Workflow,

    /// Identifiers of the upload (e.g. `Bucket` and `Key`), in the workflow's order.
    pub identifiers: Vec<(String, String)>,

    /// The data to upload.
    pub body: Option<ByteSource>,

    /// Previously persisted upload state to continue from.
    pub state: Option<UploadState>,

    /// Session token of an upload to rebuild from the backend's part listing.
    pub resume_session: Option<String>,

    /// Part size override for this upload.
    pub part_size: Option<PartSize>,

    /// Concurrency override for this upload.
    pub concurrency: Option<ConcurrencySetting>,

    /// Hook invoked right before each part is submitted.
    pub before_part_upload: Option<PartHook>,

    /// Extra request parameters per backend operation.
    pub extra_params: HashMap<Operation, Parameters>,
}

impl UploadInput {
    /// Creates a new builder-style object to manufacture [`UploadInput`](crate::operation::upload::UploadInput).
    pub fn builder() -> UploadInputBuilder {
        UploadInputBuilder::default()
    }

    /// The backend workflow driving this upload.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Identifiers of the upload.
    pub fn identifiers(&self) -> &[(String, String)] {
        &self.identifiers
    }

    /// The data to upload.
    pub fn body(&self) -> Option<&ByteSource> {
        self.body.as_ref()
    }

    /// Session token of an upload to rebuild from the backend's part listing.
    pub fn resume_session(&self) -> Option<&str> {
        self.resume_session.as_deref()
    }

    /// Hook invoked right before each part is submitted.
    pub fn before_part_upload(&self) -> Option<&PartHook> {
        self.before_part_upload.as_ref()
    }

    /// Extra request parameters for the given operation.
    pub fn extra_params(&self, operation: Operation) -> Option<&Parameters> {
        self.extra_params.get(&operation)
    }

    /// Hand off the body and the initial state, keeping the settings every attempt reads
    pub(crate) fn split(self) -> (UploadRequest, Option<ByteSource>, Option<UploadState>) {
        let request = UploadRequest {
            workflow: self.workflow,
            resume_session: self.resume_session,
            before_part_upload: self.before_part_upload,
            extra_params: self.extra_params,
        };
        (request, self.body, self.state)
    }
}

impl fmt::Debug for UploadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadInput")
            .field("workflow", &self.workflow)
            .field("identifiers", &self.identifiers)
            .field("body", &self.body)
            .field("state", &self.state)
            .field("resume_session", &self.resume_session)
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("before_part_upload", &self.before_part_upload.is_some())
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

/// Settings of an upload shared by all of its attempts.
///
/// Unlike [`UploadInput`] this never holds the body, which lives with the upload context
/// and is handed to one attempt at a time.
#[derive(Clone)]
pub(crate) struct UploadRequest {
    workflow: Workflow,
    resume_session: Option<String>,
    before_part_upload: Option<PartHook>,
    extra_params: HashMap<Operation, Parameters>,
}

impl UploadRequest {
    pub(crate) fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub(crate) fn resume_session(&self) -> Option<&str> {
        self.resume_session.as_deref()
    }

    pub(crate) fn before_part_upload(&self) -> Option<&PartHook> {
        self.before_part_upload.as_ref()
    }

    /// Merge the extra parameters configured for `operation` into `params`
    pub(crate) fn apply_extra_params(&self, operation: Operation, params: &mut Parameters) {
        if let Some(extra) = self.extra_params.get(&operation) {
            for (name, value) in extra {
                params.insert(name.clone(), value.clone());
            }
        }
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("workflow", &self.workflow)
            .field("resume_session", &self.resume_session)
            .field("before_part_upload", &self.before_part_upload.is_some())
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

/// A builder for [`UploadInput`].
#[non_exhaustive]
#[derive(Default)]
pub struct UploadInputBuilder {
    pub(crate) workflow: Option<Workflow>,
    pub(crate) identifiers: Vec<(String, String)>,
    pub(crate) body: Option<ByteSource>,
    pub(crate) state: Option<UploadState>,
    pub(crate) resume_session: Option<String>,
    pub(crate) part_size: Option<PartSize>,
    pub(crate) concurrency: Option<ConcurrencySetting>,
    pub(crate) before_part_upload: Option<PartHook>,
    pub(crate) extra_params: HashMap<Operation, Parameters>,
}

impl UploadInputBuilder {
    /// The backend workflow driving this upload. Defaults to [`Workflow::object_storage`].
    pub fn workflow(mut self, input: Workflow) -> Self {
        self.workflow = Some(input);
        self
    }

    /// The backend workflow driving this upload.
    pub fn get_workflow(&self) -> &Option<Workflow> {
        &self.workflow
    }

    /// Set an identifier of the upload (e.g. `Bucket`). Setting the same name again
    /// replaces the previous value.
    pub fn identifier(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.identifiers.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.identifiers.push((name, value)),
        }
        self
    }

    /// Identifiers of the upload.
    pub fn get_identifiers(&self) -> &[(String, String)] {
        &self.identifiers
    }

    /// The data to upload.
    ///
    /// Required.
    pub fn body(mut self, input: ByteSource) -> Self {
        self.body = Some(input);
        self
    }

    /// The data to upload.
    pub fn set_body(mut self, input: Option<ByteSource>) -> Self {
        self.body = input;
        self
    }

    /// Continue an upload from a previously persisted [`UploadState`].
    ///
    /// The state's identifiers are used for every request; parts recorded in the state are
    /// not transferred again.
    pub fn state(mut self, input: UploadState) -> Self {
        self.state = Some(input);
        self
    }

    /// Continue the upload with the given session token, rebuilding its state from the
    /// backend's part listing on first use.
    pub fn resume_session(mut self, token: impl Into<String>) -> Self {
        self.resume_session = Some(token.into());
        self
    }

    /// Part size for this upload, overriding the client configuration.
    pub fn part_size(mut self, input: PartSize) -> Self {
        self.part_size = Some(input);
        self
    }

    /// Maximum number of in-flight part transfers for this upload, overriding the client
    /// configuration.
    pub fn concurrency(mut self, input: ConcurrencySetting) -> Self {
        self.concurrency = Some(input);
        self
    }

    /// Hook invoked with every part right before it is submitted for transfer.
    pub fn before_part_upload(mut self, hook: impl Fn(&PartData) + Send + Sync + 'static) -> Self {
        self.before_part_upload = Some(Arc::new(hook));
        self
    }

    /// Add an extra request parameter to every request for `operation`.
    pub fn extra_param(
        mut self,
        operation: Operation,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.extra_params
            .entry(operation)
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Consumes the builder and constructs a [`UploadInput`](crate::operation::upload::UploadInput)
    pub fn build(self) -> Result<UploadInput, Error> {
        let workflow = self.workflow.unwrap_or_default();
        if self.state.is_some() && self.resume_session.is_some() {
            return Err(error::invalid_configuration(
                "an upload can be resumed from a state or a session token, not both",
            ));
        }

        let policy = workflow.policy();
        let known: Vec<&str> = match &self.state {
            Some(state) => state.id().iter().map(|(name, _)| name.as_str()).collect(),
            None => self.identifiers.iter().map(|(name, _)| name.as_str()).collect(),
        };
        let missing: Vec<&str> = policy
            .caller_id_fields()
            .iter()
            .map(String::as_str)
            .filter(|field| !known.contains(field))
            .collect();
        if !missing.is_empty() {
            return Err(error::invalid_configuration(format!(
                "missing required identifier(s): {}",
                missing.join(", ")
            )));
        }

        Ok(UploadInput {
            workflow,
            identifiers: self.identifiers,
            body: self.body,
            state: self.state,
            resume_session: self.resume_session,
            part_size: self.part_size,
            concurrency: self.concurrency,
            before_part_upload: self.before_part_upload,
            extra_params: self.extra_params,
        })
    }
}

impl fmt::Debug for UploadInputBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadInputBuilder")
            .field("workflow", &self.workflow)
            .field("identifiers", &self.identifiers)
            .field("body", &self.body)
            .field("state", &self.state)
            .field("resume_session", &self.resume_session)
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("before_part_upload", &self.before_part_upload.is_some())
            .field("extra_params", &self.extra_params)
            .finish()
    }
}
