/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// The target part size for an upload request.
#[derive(Debug, Clone, Default)]
pub enum PartSize {
    /// Let the upload workflow pick a part size based on the source length and the
    /// backend's part count limit.
    #[default]
    Auto,

    /// Part size explicitly given.
    ///
    /// NOTE: The size is validated against the backend's constraints (e.g. minimum size,
    /// power-of-two sizing) when the upload is initiated.
    Target(u64),
}

/// The concurrency settings to use for a single upload request.
#[derive(Debug, Clone, Default)]
pub enum ConcurrencySetting {
    /// Use the default number of in-flight part transfers.
    #[default]
    Auto,

    /// Explicitly configured maximum number of in-flight part transfers.
    Explicit(usize),
}
