/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_sdk_s3::error::DisplayErrorContext;
use tokio::task;
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};
use tracing::Instrument;

use crate::backend::BackendRequest;
use crate::error::{self, Error};
use crate::io::part_reader::PartEnumerator;
use crate::io::PartData;
use crate::operation::upload::UploadContext;
use crate::state::PartMetadata;
use crate::workflow::Operation;

/// Outcome of a single part transfer as reported back to the driver
type PartOutcome = Result<(u64, PartMetadata), Error>;

/// Request/input type for our "upload_part" service.
#[derive(Debug)]
pub(super) struct UploadPartRequest {
    pub(super) ctx: UploadContext,
    pub(super) part_size: u64,
    pub(super) part: PartData,
    pub(super) outcomes: async_channel::Sender<PartOutcome>,
}

/// handler (service fn) for a single part
async fn upload_part_handler(request: UploadPartRequest) -> Result<(), Error> {
    let UploadPartRequest {
        ctx,
        part_size,
        mut part,
        outcomes,
    } = request;
    let part_number = part.part_number();

    let outcome = upload_part(&ctx, part_size, &mut part)
        .await
        .map_err(|err| error::part_failed(part_number, err));
    // the driver keeps the receiver until every task has finished
    let _ = outcomes.send(outcome).await;
    Ok(())
}

async fn upload_part(
    ctx: &UploadContext,
    part_size: u64,
    part: &mut PartData,
) -> Result<(u64, PartMetadata), Error> {
    let workflow = ctx.workflow();
    let policy = workflow.policy();
    let strategy = workflow.strategy();

    let body = part.load(strategy.part_digests()).await?;
    let mut params = policy.id_params(&ctx.state());
    ctx.request().apply_extra_params(Operation::UploadPart, &mut params);
    strategy.part_params(policy, part, &mut params)?;

    let request =
        BackendRequest::new(policy.operation_name(Operation::UploadPart), params).with_body(body);
    let response = ctx
        .backend()
        .execute(request.clone())
        .instrument(tracing::debug_span!(
            "send-upload-part",
            part_number = part.part_number(),
            len = part.len()
        ))
        .await?;

    tracing::trace!("completed upload of part number {}", part.part_number());
    strategy.handle_part_result(policy, part_size, &request, &response)
}

/// Create a new tower::Service for uploading individual parts
pub(super) fn upload_part_service(
    concurrency: usize,
) -> impl Service<UploadPartRequest, Response = (), Error = Error, Future: Send> + Send {
    let svc = service_fn(upload_part_handler);
    ServiceBuilder::new()
        .concurrency_limit(concurrency)
        .service(svc)
}

/// Drive the part transfers of one upload attempt.
///
/// Parts are pulled from the enumerator one at a time and submitted to a concurrency
/// limited service; each transfer runs in its own task and reports its outcome over a
/// channel. This function is the only writer of the upload state while parts are in
/// flight. After the first failure no new parts are submitted, but transfers already in
/// flight are allowed to finish and their results are recorded.
///
/// Returns every failure observed.
pub(super) async fn distribute_work(
    ctx: &UploadContext,
    parts: &mut PartEnumerator,
    part_size: u64,
) -> Vec<Error> {
    let (tx, rx) = async_channel::unbounded::<PartOutcome>();
    let mut svc = upload_part_service(ctx.concurrency);
    let mut tasks = task::JoinSet::new();
    let mut failures = Vec::new();

    loop {
        while let Ok(outcome) = rx.try_recv() {
            record_outcome(ctx, outcome, &mut failures);
        }
        if !failures.is_empty() {
            tracing::debug!("part failure observed, no further parts will be submitted");
            break;
        }

        let part = match parts.next_part().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(
                    "failed to read the source at offset {}: {}",
                    parts.position(),
                    DisplayErrorContext(&err)
                );
                failures.push(err);
                break;
            }
        };

        if let Some(hook) = ctx.request().before_part_upload() {
            hook(&part);
        }

        let req = UploadPartRequest {
            ctx: ctx.clone(),
            part_size,
            part,
            outcomes: tx.clone(),
        };
        let ready = match svc.ready().await {
            Ok(ready) => ready,
            Err(err) => {
                failures.push(err);
                break;
            }
        };
        // a failure may have been reported while waiting for capacity
        while let Ok(outcome) = rx.try_recv() {
            record_outcome(ctx, outcome, &mut failures);
        }
        if !failures.is_empty() {
            tracing::debug!(
                "part failure observed, part {} will not be submitted",
                req.part.part_number()
            );
            break;
        }
        tasks.spawn(ready.call(req));
    }

    // wait for in-flight transfers, every sender is dropped once they finish
    drop(tx);
    while let Ok(outcome) = rx.recv().await {
        record_outcome(ctx, outcome, &mut failures);
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            failures.push(err.into());
        }
    }

    tracing::trace!(
        "pool drained at source position {} with {} failure(s)",
        parts.position(),
        failures.len()
    );
    failures
}

fn record_outcome(ctx: &UploadContext, outcome: PartOutcome, failures: &mut Vec<Error>) {
    match outcome {
        Ok((part_number, metadata)) => {
            if let Err(err) = ctx.state().mark_part_uploaded(part_number, metadata) {
                failures.push(err);
            }
        }
        Err(err) => {
            tracing::warn!("{}", DisplayErrorContext(&err));
            failures.push(err);
        }
    }
}
