/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::backend::BackendClient;
use crate::error::{self, Error};
use crate::io::ByteSource;
use crate::operation::upload::handle::UploadPhase;
use crate::operation::upload::input::UploadRequest;
use crate::state::UploadState;
use crate::workflow::Workflow;

/// Internal context used to drive a single Upload operation
#[derive(Debug, Clone)]
pub(crate) struct UploadContext {
    /// reference to client handle used to do actual work
    pub(crate) handle: Arc<crate::client::Handle>,
    /// settings shared by every attempt; the body is held separately in `source`
    pub(crate) request: Arc<UploadRequest>,
    /// resolved part size, used unless the state already records one
    pub(crate) part_size: u64,
    /// maximum number of in-flight part transfers
    pub(crate) concurrency: usize,
    state: Arc<Mutex<UploadState>>,
    source: Arc<Mutex<Option<ByteSource>>>,
    phase: Arc<Mutex<UploadPhase>>,
    resolved: Arc<OnceCell<()>>,
}

impl UploadContext {
    pub(crate) fn new(
        handle: Arc<crate::client::Handle>,
        request: UploadRequest,
        state: UploadState,
        source: ByteSource,
        part_size: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            handle,
            request: Arc::new(request),
            part_size,
            concurrency,
            state: Arc::new(Mutex::new(state)),
            source: Arc::new(Mutex::new(Some(source))),
            phase: Arc::new(Mutex::new(UploadPhase::Idle)),
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// The backend client to use for requests
    pub(crate) fn backend(&self) -> &dyn BackendClient {
        self.handle.backend().as_ref()
    }

    /// The upload settings
    pub(crate) fn request(&self) -> &UploadRequest {
        self.request.deref()
    }

    pub(crate) fn workflow(&self) -> &Workflow {
        self.request.workflow()
    }

    /// Lock the upload state.
    ///
    /// The lock is never held across an await point.
    pub(crate) fn state(&self) -> MutexGuard<'_, UploadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> UploadPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_phase(&self, phase: UploadPhase) {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != phase {
            tracing::debug!("upload phase {} -> {}", *current, phase);
            *current = phase;
        }
    }

    /// Take the source for a new attempt.
    ///
    /// Seekable sources are cloned so every attempt can re-read them. Sequential readers
    /// can only be handed out once.
    pub(crate) fn take_source(&self) -> Result<ByteSource, Error> {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(seekable) = source.as_ref().and_then(ByteSource::try_clone) {
            return Ok(seekable);
        }
        source.take().ok_or_else(|| {
            error::invalid_configuration(
                "the upload source is a sequential reader that was consumed by a previous attempt",
            )
        })
    }

    /// Resolve the upload state once, rebuilding it from the backend's part listing if
    /// the upload was created from a session token.
    ///
    /// A failed resolution is retried by the next caller.
    pub(crate) async fn resolve(&self) -> Result<(), Error> {
        self.resolved
            .get_or_try_init(|| async {
                let Some(token) = self.request.resume_session() else {
                    return Ok(());
                };
                self.set_phase(UploadPhase::Resolving);
                let identifiers = self.state().id().to_vec();
                let state = crate::operation::upload::resume_state(
                    self.backend(),
                    self.workflow(),
                    identifiers,
                    token,
                )
                .await?;
                *self.state() = state;
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }
}
