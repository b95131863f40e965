/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::backend::BackendRequest;
use crate::error::{self, Error};
use crate::operation::upload::context::UploadContext;
use crate::operation::upload::UploadOutput;
use crate::state::{UploadState, UploadStatus};
use crate::workflow::Operation;

/// Observable phase of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UploadPhase {
    /// No attempt has been started
    Idle,
    /// Rebuilding the upload state from the backend's part listing
    Resolving,
    /// Sending the initiate request
    Initiating,
    /// Parts are being transferred
    TransferringParts,
    /// Sending the complete request
    Completing,
    /// The upload completed
    Done,
    /// Sending the abort request
    Aborting,
    /// The upload was aborted
    Aborted,
    /// The last attempt failed; the upload can be retried or aborted
    Failed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Idle => "idle",
            UploadPhase::Resolving => "resolving",
            UploadPhase::Initiating => "initiating",
            UploadPhase::TransferringParts => "transferring-parts",
            UploadPhase::Completing => "completing",
            UploadPhase::Done => "done",
            UploadPhase::Aborting => "aborting",
            UploadPhase::Aborted => "aborted",
            UploadPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A cloneable handle to the result of a spawned operation.
///
/// Every clone resolves to the same result. Dropping it does not cancel the operation.
#[must_use = "futures do nothing unless polled"]
pub struct SharedResult<T> {
    inner: Shared<BoxFuture<'static, Result<T, Error>>>,
}

impl<T> SharedResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `future` on the runtime, returning the shared result and a handle to cancel it
    fn spawn<F>(future: F) -> (Self, AbortHandle)
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let task = tokio::spawn(future);
        let abort = task.abort_handle();
        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
        .shared();
        (Self { inner }, abort)
    }

    /// Returns true while the operation has not produced a result
    pub fn is_pending(&self) -> bool {
        self.inner.peek().is_none()
    }
}

impl<T> Clone for SharedResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Future for SharedResult<T>
where
    T: Clone,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for SharedResult<T>
where
    T: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResult")
            .field("pending", &self.inner.peek().is_none())
            .finish()
    }
}

struct InFlight<T> {
    result: SharedResult<T>,
    task: AbortHandle,
}

impl<T> fmt::Debug for InFlight<T>
where
    T: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("result", &self.result)
            .field("task", &self.task)
            .finish()
    }
}

type AttemptSlot = Arc<Mutex<Option<InFlight<UploadOutput>>>>;

/// Handle to a multipart upload.
///
/// Nothing is sent until [`upload`](Self::upload) is called. A failed attempt leaves the
/// upload initiated with every successful part recorded, so calling `upload` again only
/// transfers the missing parts.
///
/// # Cancellation
///
/// Dropping the handle or the futures it returns does not cancel an attempt. Calling
/// [`Self::abort`] on an initiated upload cancels any in-flight attempt at its await
/// points (in-flight part requests are dropped) and then aborts the upload on the backend. State transitions
/// are applied after the awaited backend call returns, so the recorded state is
/// always consistent.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    /// The context used to drive an upload to completion
    pub(crate) ctx: UploadContext,
    attempt: AttemptSlot,
    aborting: Arc<Mutex<Option<InFlight<()>>>>,
}

impl UploadHandle {
    pub(crate) fn new(ctx: UploadContext) -> Self {
        Self {
            ctx,
            attempt: Arc::default(),
            aborting: Arc::default(),
        }
    }

    /// Start an upload attempt, or join the attempt already in flight.
    ///
    /// The attempt resolves the upload state, initiates the upload if needed, transfers
    /// every part that is not recorded yet and completes the upload. On part failures the
    /// returned error is a [`MultipartUploadAggregateFailure`] carrying a snapshot of the
    /// upload state and every failure.
    ///
    /// [`MultipartUploadAggregateFailure`]: crate::error::ErrorKind::MultipartUploadAggregateFailure
    pub fn upload(&self) -> SharedResult<UploadOutput> {
        let pending_abort = self
            .aborting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|abort| abort.result.clone());

        let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = attempt.as_ref().filter(|a| a.result.is_pending()) {
            return in_flight.result.clone();
        }
        let ctx = self.ctx.clone();
        let (result, task) = SharedResult::spawn(async move {
            if let Some(pending_abort) = pending_abort {
                let _ = pending_abort.await;
            }
            let result = crate::operation::upload::upload_attempt(&ctx)
                .instrument(tracing::debug_span!("upload-attempt"))
                .await;
            if result.is_err() && !ctx.state().status().is_terminal() {
                ctx.set_phase(UploadPhase::Failed);
            }
            result
        });
        *attempt = Some(InFlight {
            result: result.clone(),
            task,
        });
        result
    }

    /// Abort the upload and cancel any in-flight attempt.
    ///
    /// Only an initiated upload can be aborted, otherwise this fails with
    /// [`NotInitiated`](crate::error::ErrorKind::NotInitiated) and an in-flight attempt is
    /// left running. The status is checked before anything is cancelled, so an attempt
    /// that is still initiating the upload is never interrupted. Calling `abort` again
    /// while the abort is in flight returns the same result.
    pub fn abort(&self) -> SharedResult<()> {
        let mut aborting = self.aborting.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = aborting.as_ref().filter(|a| a.result.is_pending()) {
            return in_flight.result.clone();
        }

        let ctx = self.ctx.clone();
        let attempt = self.attempt.clone();
        let (result, task) = SharedResult::spawn(
            async move {
                let result = abort_upload(&ctx, &attempt).await;
                if result.is_err() && ctx.phase() == UploadPhase::Aborting {
                    ctx.set_phase(UploadPhase::Failed);
                }
                result
            }
            .instrument(tracing::debug_span!("abort-upload")),
        );
        *aborting = Some(InFlight {
            result: result.clone(),
            task,
        });
        result
    }

    /// A snapshot of the current upload state
    pub fn state(&self) -> UploadState {
        self.ctx.state().clone()
    }

    /// The current phase of the upload
    pub fn phase(&self) -> UploadPhase {
        self.ctx.phase()
    }

    /// The part size used for parts of this upload
    pub fn part_size(&self) -> u64 {
        self.ctx.state().part_size().unwrap_or(self.ctx.part_size)
    }
}

fn ensure_initiated(ctx: &UploadContext) -> Result<(), Error> {
    let state = ctx.state();
    if state.is_initiated() {
        Ok(())
    } else {
        Err(error::not_initiated(format!(
            "only an initiated upload can be aborted, the upload is {}",
            state.status()
        )))
    }
}

async fn abort_upload(ctx: &UploadContext, attempt: &AttemptSlot) -> Result<(), Error> {
    ctx.resolve().await?;
    ensure_initiated(ctx)?;

    let cancelled = attempt
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .filter(|attempt| attempt.result.is_pending());
    if let Some(attempt) = cancelled {
        tracing::debug!("cancelling in-flight upload attempt");
        attempt.task.abort();
        // resolves once the cancelled task has been torn down
        let _ = attempt.result.await;
    }

    let workflow = ctx.workflow();
    let policy = workflow.policy();
    let request = {
        // the cancelled attempt may have completed the upload before it was stopped
        ensure_initiated(ctx)?;
        let state = ctx.state();
        let mut params = policy.id_params(&state);
        ctx.request().apply_extra_params(Operation::Abort, &mut params);
        BackendRequest::new(policy.operation_name(Operation::Abort), params)
    };

    ctx.set_phase(UploadPhase::Aborting);
    ctx.backend()
        .execute(request)
        .instrument(tracing::debug_span!("send-abort"))
        .await?;

    ctx.state().set_status(UploadStatus::Aborted)?;
    ctx.set_phase(UploadPhase::Aborted);
    tracing::debug!("upload aborted");
    Ok(())
}
