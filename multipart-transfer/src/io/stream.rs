/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::default::Default;
use std::fmt;
use std::path::Path;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::Error;
use crate::io::path_body::{PathBody, PathBodyBuilder};

/// Source of binary data for an upload.
///
/// In-memory buffers and file ranges support random access: parts can be read by
/// offset and a failed upload can be retried from the same source. Arbitrary readers
/// are consumed sequentially and can only back a single upload attempt.
#[derive(Debug)]
pub struct ByteSource {
    pub(super) inner: RawByteSource,
}

impl ByteSource {
    /// Create a new `ByteSource` from a static byte slice
    pub fn from_static(bytes: &'static [u8]) -> Self {
        let inner = RawByteSource::Buf(bytes.into());
        Self { inner }
    }

    /// Returns a [`PathBodyBuilder`], allowing you to build a `ByteSource` with
    /// full control over how the file is read (eg. specifying the length of
    /// the file or the starting offset to read from).
    ///
    /// ```no_run
    /// # {
    /// use multipart_transfer::io::ByteSource;
    ///
    /// fn source_from_file() -> ByteSource {
    ///     ByteSource::read_from()
    ///         .path("docs/some-large-file.csv")
    ///         // Specify the length of the file used (skips an additional call to retrieve the size)
    ///         .length(123_456)
    ///         .build()
    ///         .expect("valid path")
    /// }
    /// # }
    /// ```
    pub fn read_from() -> PathBodyBuilder {
        PathBodyBuilder::new()
    }

    /// Create a new `ByteSource` that reads data from a given `path`.
    ///
    /// ## Warning
    /// The contents of the file MUST not change. The length of the file is captured when
    /// the source is created and parts are read by offset, possibly across retries.
    pub fn from_path(path: impl AsRef<Path>) -> Result<ByteSource, Error> {
        Self::read_from().path(path.as_ref()).build()
    }

    /// Create a new `ByteSource` that reads sequentially from an async reader of unknown length.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::reader(Box::new(reader), None)
    }

    /// Create a new `ByteSource` that reads sequentially from an async reader that will
    /// yield `length` bytes.
    ///
    /// The length is only used to pick a part size; the reader is consumed until it
    /// reports end of stream.
    pub fn from_reader_with_length(
        reader: impl AsyncRead + Send + Unpin + 'static,
        length: u64,
    ) -> Self {
        Self::reader(Box::new(reader), Some(length))
    }

    fn reader(reader: Box<dyn AsyncRead + Send + Unpin>, length: Option<u64>) -> Self {
        Self {
            inner: RawByteSource::Reader(ReaderSource { reader, length }),
        }
    }

    /// The number of bytes in this source, if known
    pub fn len(&self) -> Option<u64> {
        match &self.inner {
            RawByteSource::Buf(bytes) => Some(bytes.len() as u64),
            RawByteSource::Fs(path_body) => Some(path_body.length),
            RawByteSource::Reader(reader) => reader.length,
        }
    }

    /// Returns true if this source is known to contain no data
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns true if parts of this source can be read by offset
    pub fn is_seekable(&self) -> bool {
        !matches!(self.inner, RawByteSource::Reader(_))
    }

    /// Clone a seekable source. Returns `None` for sequential readers.
    pub(crate) fn try_clone(&self) -> Option<ByteSource> {
        let inner = match &self.inner {
            RawByteSource::Buf(bytes) => RawByteSource::Buf(bytes.clone()),
            RawByteSource::Fs(path_body) => RawByteSource::Fs(path_body.clone()),
            RawByteSource::Reader(_) => return None,
        };
        Some(Self { inner })
    }

    pub(crate) fn into_inner(self) -> RawByteSource {
        self.inner
    }
}

#[derive(Debug)]
pub(crate) enum RawByteSource {
    /// In-memory buffer to read from
    Buf(Bytes),
    /// File based input
    Fs(PathBody),
    /// User provided sequential reader
    Reader(ReaderSource),
}

pub(crate) struct ReaderSource {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) length: Option<u64>,
}

impl fmt::Debug for ReaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource(dyn AsyncRead)")
            .field("length", &self.length)
            .finish()
    }
}

impl Default for ByteSource {
    fn default() -> Self {
        Self {
            inner: RawByteSource::Buf(Bytes::default()),
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(value: Bytes) -> Self {
        Self {
            inner: RawByteSource::Buf(value),
        }
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static [u8]> for ByteSource {
    fn from(slice: &'static [u8]) -> ByteSource {
        Self::from(Bytes::from_static(slice))
    }
}

impl From<&'static str> for ByteSource {
    fn from(slice: &'static str) -> ByteSource {
        Self::from(Bytes::from_static(slice.as_bytes()))
    }
}
