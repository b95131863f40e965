/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use crate::backend::BackendError;
use crate::state::{UploadState, UploadStatus};

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// Errors are cheap to clone so that a single upload result can be observed by every
/// caller awaiting the same attempt.
///
/// NOTE: Use [`aws_sdk_s3::error::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    source: Arc<dyn std::error::Error + Send + Sync>,
}

/// General categories of transfer errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Missing identifiers, invalid part size or an unusable source. Raised before any
    /// request is sent.
    InvalidConfiguration,

    /// The upload has already been completed or aborted
    AlreadyFinalized,

    /// The operation requires an initiated upload
    NotInitiated,

    /// The upload session token was already set
    AlreadyInitiated,

    /// The part size was already set
    AlreadySized,

    /// An illegal upload status transition was attempted
    InvalidTransition,

    /// Transferring a single part failed
    PartTransferFailed(PartFailed),

    /// One or more parts of an upload attempt failed, see [`MultipartUploadFailure`]
    MultipartUploadAggregateFailure,

    /// The recorded parts are not numbered contiguously from 1
    IncompletePartSet,

    /// The backend rejected an initiate, complete, abort or list request. The source is
    /// the backend's own [`BackendError`].
    BackendFailure,

    /// A backend response was missing a field required to continue
    MalformedResponse,

    /// I/O errors
    IOError,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex, etc)
    RuntimeError,

    /// The operation was cancelled, e.g. by aborting the upload while an attempt was in flight
    OperationCancelled,
}

/// Stores information about a failed part
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartFailed {
    part_number: u64,
}

impl PartFailed {
    /// The 1-based number of the part that failed
    pub fn part_number(&self) -> u64 {
        self.part_number
    }
}

/// Summary of a failed upload attempt.
///
/// Carries a snapshot of the [`UploadState`] at the time the attempt gave up (still
/// initiated, with every part that did succeed recorded) along with every per-part
/// failure. Retrying the upload only transfers the parts that are missing from the state.
#[derive(Debug, Clone)]
pub struct MultipartUploadFailure {
    state: UploadState,
    failures: Vec<Error>,
}

impl MultipartUploadFailure {
    pub(crate) fn new(state: UploadState, failures: Vec<Error>) -> Self {
        Self { state, failures }
    }

    /// The upload state at the end of the failed attempt
    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Every failure observed during the attempt
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    /// The numbers of the parts that failed
    pub fn failed_part_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self
            .failures
            .iter()
            .filter_map(|err| match err.kind() {
                ErrorKind::PartTransferFailed(part) => Some(part.part_number()),
                _ => None,
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

impl fmt::Display for MultipartUploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure(s) while uploading parts, {} part(s) recorded as uploaded",
            self.failures.len(),
            self.state.uploaded_parts().len()
        )
    }
}

impl std::error::Error for MultipartUploadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Creates a new transfer [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        let source: BoxError = err.into();
        Error {
            kind,
            source: Arc::from(source),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the aggregate failure details if this error is a
    /// [`ErrorKind::MultipartUploadAggregateFailure`].
    pub fn aggregate(&self) -> Option<&MultipartUploadFailure> {
        self.source.downcast_ref::<MultipartUploadFailure>()
    }

    /// Returns the backend's own error if this error originated from the backend.
    pub fn backend_error(&self) -> Option<&BackendError> {
        self.source.downcast_ref::<BackendError>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidConfiguration => write!(f, "invalid configuration"),
            ErrorKind::AlreadyFinalized => write!(f, "upload already finalized"),
            ErrorKind::NotInitiated => write!(f, "upload not initiated"),
            ErrorKind::AlreadyInitiated => write!(f, "upload already initiated"),
            ErrorKind::AlreadySized => write!(f, "part size already set"),
            ErrorKind::InvalidTransition => write!(f, "invalid upload status transition"),
            ErrorKind::PartTransferFailed(part) => {
                write!(f, "failed to transfer part {}", part.part_number)
            }
            ErrorKind::MultipartUploadAggregateFailure => write!(f, "multipart upload failed"),
            ErrorKind::IncompletePartSet => write!(f, "incomplete part set"),
            ErrorKind::BackendFailure => write!(f, "backend request failed"),
            ErrorKind::MalformedResponse => write!(f, "malformed backend response"),
            ErrorKind::IOError => write!(f, "I/O error"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
            ErrorKind::OperationCancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        if value.is_cancelled() {
            operation_cancelled()
        } else {
            Self::new(ErrorKind::RuntimeError, value)
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(value: std::sync::PoisonError<T>) -> Self {
        Self::new(ErrorKind::RuntimeError, value.to_string())
    }
}

impl From<BackendError> for Error {
    fn from(value: BackendError) -> Self {
        Self::new(ErrorKind::BackendFailure, value)
    }
}

pub(crate) fn invalid_configuration<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InvalidConfiguration, err)
}

pub(crate) fn already_finalized(status: UploadStatus) -> Error {
    Error::new(
        ErrorKind::AlreadyFinalized,
        format!("upload is {status} and cannot be uploaded again"),
    )
}

pub(crate) fn not_initiated<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::NotInitiated, err)
}

pub(crate) fn invalid_transition(from: UploadStatus, to: UploadStatus) -> Error {
    Error::new(
        ErrorKind::InvalidTransition,
        format!("cannot transition upload from {from} to {to}"),
    )
}

pub(crate) fn part_failed<E>(part_number: u64, err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(
        ErrorKind::PartTransferFailed(PartFailed { part_number }),
        err,
    )
}

pub(crate) fn aggregate(failure: MultipartUploadFailure) -> Error {
    Error::new(ErrorKind::MultipartUploadAggregateFailure, failure)
}

pub(crate) fn incomplete_part_set<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::IncompletePartSet, err)
}

pub(crate) fn malformed_response<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::MalformedResponse, err)
}

static CANCELLATION_ERROR: &str =
    "the upload was aborted while an attempt was in flight, no further parts will be sent";

pub(crate) fn operation_cancelled() -> Error {
    Error::new(ErrorKind::OperationCancelled, CANCELLATION_ERROR)
}
