/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::backend::BackendResponse;

/// Result of a completed multipart upload
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutput {
    session_token: String,
    part_count: usize,
    response: BackendResponse,
}

impl UploadOutput {
    pub(crate) fn new(session_token: String, part_count: usize, response: BackendResponse) -> Self {
        Self {
            session_token,
            part_count,
            response,
        }
    }

    /// The upload session token issued when the upload was initiated
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Number of parts the completed upload consists of
    pub fn part_count(&self) -> usize {
        self.part_count
    }

    /// The backend's response to the complete request
    pub fn response(&self) -> &BackendResponse {
        &self.response
    }
}
