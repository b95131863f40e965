/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;

use crate::error::{self, Error};
use crate::io::stream::{ByteSource, RawByteSource};

/// A byte range of a file on disk
#[derive(Debug, Clone)]
pub(crate) struct PathBody {
    pub(crate) path: PathBuf,
    // number of bytes to read
    pub(crate) length: u64,
    // offset in the file to start reading from
    pub(crate) offset: u64,
}

/// Builder for creating a [`ByteSource`] that reads a range of a file.
#[derive(Debug, Default)]
pub struct PathBodyBuilder {
    path: Option<PathBuf>,
    length: Option<u64>,
    offset: Option<u64>,
}

impl PathBodyBuilder {
    /// Create a new [`PathBodyBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path to read from.
    ///
    /// NOTE: This field is required.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Specify the offset to start reading from (in bytes)
    ///
    /// When used in conjunction with `length`, allows for reading a single "chunk" of a file.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Specify the length to read (in bytes).
    ///
    /// By pre-specifying the length, this API skips an additional call to retrieve the size from file-system metadata.
    ///
    /// When used in conjunction with `offset`, allows for reading a single "chunk" of a file.
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Returns a [`ByteSource`] from this builder.
    pub fn build(self) -> Result<ByteSource, Error> {
        let path = self
            .path
            .ok_or_else(|| error::invalid_configuration("path is required"))?;
        let offset = self.offset.unwrap_or_default();

        let length = match self.length {
            Some(length) => length,
            None => {
                let metadata = std::fs::metadata(&path)?;
                metadata.len().checked_sub(offset).ok_or_else(|| {
                    error::invalid_configuration(format!(
                        "offset {offset} is past the end of {} ({} bytes)",
                        path.display(),
                        metadata.len()
                    ))
                })?
            }
        };

        let body = PathBody {
            path,
            length,
            offset,
        };
        Ok(ByteSource {
            inner: RawByteSource::Fs(body),
        })
    }
}
