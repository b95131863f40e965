/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::checksum::{DigestKind, PartDigests};
use crate::error::Error;
use crate::io::hashing::HashingStream;
use crate::io::stream::{ByteSource, RawByteSource};

/// Contents and (optional) digests for a single part of a multipart upload.
#[derive(Debug, Clone)]
pub struct PartData {
    // 1-indexed
    part_number: u64,
    // offset of the part within the source
    offset: u64,
    len: u64,
    body: PartBody,
    digests: PartDigests,
}

#[derive(Debug, Clone)]
enum PartBody {
    /// Materialized part contents
    Bytes(Bytes),
    /// A range of a file that has not been read yet
    File { path: PathBuf, offset: u64 },
}

impl PartData {
    fn new(part_number: u64, offset: u64, len: u64, body: PartBody, digests: PartDigests) -> Self {
        Self {
            part_number,
            offset,
            len,
            body,
            digests,
        }
    }

    /// The 1-based part number
    pub fn part_number(&self) -> u64 {
        self.part_number
    }

    /// Offset of the first byte of this part within the source
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes in this part
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if this part has no data (only possible for an empty source)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Digests computed for this part so far
    pub fn digests(&self) -> &PartDigests {
        &self.digests
    }

    /// Load the part contents and compute any of the given digests not computed yet.
    ///
    /// File ranges are read and hashed on the blocking thread pool.
    pub(crate) async fn load(&mut self, kinds: &[DigestKind]) -> Result<Bytes, Error> {
        let needs_digests = !self.digests.contains_all(kinds);
        match &self.body {
            PartBody::Bytes(data) if !needs_digests => return Ok(data.clone()),
            _ => {}
        }

        let body = self.body.clone();
        let len = self.len;
        let kinds = kinds.to_vec();
        let existing = self.digests.clone();
        let (data, digests) = tokio::task::spawn_blocking(move || {
            let data = match body {
                PartBody::Bytes(data) => data,
                PartBody::File { path, offset } => {
                    let mut dst = BytesMut::zeroed(len as usize);
                    file_util::read_file_chunk_sync(&mut dst, path, offset)?;
                    dst.freeze()
                }
            };
            let digests = if existing.contains_all(&kinds) {
                existing
            } else {
                PartDigests::compute(&kinds, &data)
            };
            Ok::<_, Error>((data, digests))
        })
        .await??;

        self.body = PartBody::Bytes(data.clone());
        self.digests = digests;
        Ok(data)
    }
}

/// Produces the parts of a [`ByteSource`] in order, skipping parts that are already uploaded.
///
/// The sequence is finite and strictly forward. For seekable sources the enumerator only
/// advances a logical position and workers read the claimed range later. Sequential
/// readers are consumed as parts are produced: skipped parts are read and discarded,
/// other parts are materialized while the digests required by the workflow are computed.
///
/// An empty source yields exactly one empty part.
#[derive(Debug)]
pub(crate) struct PartEnumerator {
    inner: Inner,
    part_size: u64,
    uploaded: BTreeSet<u64>,
    digests: Vec<DigestKind>,
    next_part: u64,
    position: u64,
    done: bool,
}

#[derive(Debug)]
enum Inner {
    Seekable { source: SeekableSource, len: u64 },
    Sequential { reader: super::stream::ReaderSource },
}

#[derive(Debug)]
enum SeekableSource {
    Bytes(Bytes),
    File { path: PathBuf, offset: u64 },
}

impl PartEnumerator {
    /// Create a new enumerator.
    ///
    /// `uploaded` is a snapshot of the parts recorded as uploaded when enumeration starts.
    pub(crate) fn new(
        source: ByteSource,
        part_size: u64,
        uploaded: BTreeSet<u64>,
        digests: &[DigestKind],
    ) -> Self {
        let inner = match source.into_inner() {
            RawByteSource::Buf(buf) => Inner::Seekable {
                len: buf.len() as u64,
                source: SeekableSource::Bytes(buf),
            },
            RawByteSource::Fs(path_body) => Inner::Seekable {
                len: path_body.length,
                source: SeekableSource::File {
                    path: path_body.path,
                    offset: path_body.offset,
                },
            },
            RawByteSource::Reader(reader) => Inner::Sequential { reader },
        };

        Self {
            inner,
            part_size,
            uploaded,
            digests: digests.to_vec(),
            next_part: 1,
            position: 0,
            done: false,
        }
    }

    /// Number of source bytes claimed or consumed so far
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Number of parts in the source, known once every part has been enumerated
    pub(crate) fn part_count(&self) -> Option<u64> {
        self.done.then(|| self.next_part - 1)
    }

    /// Pull the next part that still needs to be uploaded
    pub(crate) async fn next_part(&mut self) -> Result<Option<PartData>, Error> {
        if self.done {
            return Ok(None);
        }
        let result = if matches!(self.inner, Inner::Seekable { .. }) {
            Ok(self.next_seekable())
        } else {
            self.next_sequential().await
        };
        if result.is_err() {
            self.done = true;
        }
        result
    }

    fn next_seekable(&mut self) -> Option<PartData> {
        let Inner::Seekable { source, len } = &self.inner else {
            return None;
        };
        let len = *len;

        loop {
            let part_number = self.next_part;
            let first_and_empty = part_number == 1 && len == 0;
            if self.position >= len && !first_and_empty {
                self.done = true;
                return None;
            }

            let offset = self.position;
            let part_len = self.part_size.min(len - offset);
            self.position += part_len;
            self.next_part += 1;
            if first_and_empty {
                self.done = true;
            }

            if self.uploaded.contains(&part_number) {
                tracing::trace!("skipping part {part_number}, already uploaded");
                if self.done {
                    return None;
                }
                continue;
            }

            let body = match source {
                SeekableSource::Bytes(buf) => {
                    PartBody::Bytes(buf.slice(offset as usize..(offset + part_len) as usize))
                }
                SeekableSource::File { path, offset: base } => PartBody::File {
                    path: path.clone(),
                    offset: base + offset,
                },
            };
            tracing::trace!("claimed part {part_number} ({part_len} bytes at offset {offset})");
            return Some(PartData::new(
                part_number,
                offset,
                part_len,
                body,
                PartDigests::default(),
            ));
        }
    }

    async fn next_sequential(&mut self) -> Result<Option<PartData>, Error> {
        let part_size = self.part_size;
        let Inner::Sequential { reader } = &mut self.inner else {
            return Ok(None);
        };
        let reader = &mut reader.reader;

        loop {
            let part_number = self.next_part;
            let offset = self.position;

            if self.uploaded.contains(&part_number) {
                let mut skipped_part = (&mut *reader).take(part_size);
                let skipped = tokio::io::copy(&mut skipped_part, &mut tokio::io::sink()).await?;
                tracing::trace!("skipped part {part_number}, discarded {skipped} bytes");
                self.position += skipped;
                self.next_part += 1;
                if skipped < part_size {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }

            let (data, digests) =
                read_hashed((&mut *reader).take(part_size), &self.digests, part_size).await?;
            let read = data.len() as u64;
            if read == 0 && part_number > 1 {
                self.done = true;
                return Ok(None);
            }
            if read < part_size {
                self.done = true;
            }

            self.position += read;
            self.next_part += 1;
            tracing::trace!("read part {part_number} ({read} bytes at offset {offset})");
            return Ok(Some(PartData::new(
                part_number,
                offset,
                read,
                PartBody::Bytes(data),
                digests,
            )));
        }
    }
}

/// Read `reader` to the end through one [`HashingStream`] per digest kind
async fn read_hashed<R>(
    reader: R,
    kinds: &[DigestKind],
    capacity: u64,
) -> Result<(Bytes, PartDigests), Error>
where
    R: AsyncRead + Send + Unpin,
{
    let computed = Arc::new(Mutex::new(PartDigests::default()));
    let mut stream: Box<dyn AsyncRead + Send + Unpin + '_> = Box::new(reader);
    for kind in kinds {
        let slot = computed.clone();
        let kind = *kind;
        stream = Box::new(HashingStream::new(stream, kind, move |digest| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set(kind, digest);
        }));
    }

    let mut data = Vec::with_capacity(capacity.min(64 * crate::MEBIBYTE) as usize);
    stream.read_to_end(&mut data).await?;
    drop(stream);

    let digests = computed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Ok((Bytes::from(data), digests))
}

mod file_util {
    #[cfg(unix)]
    pub(super) use unix::read_file_chunk_sync;
    #[cfg(windows)]
    pub(super) use windows::read_file_chunk_sync;

    #[cfg(unix)]
    mod unix {
        use std::fs::File;
        use std::io;
        use std::os::unix::fs::FileExt;
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let file = File::open(path)?;
            file.read_exact_at(dst, offset)
        }
    }

    #[cfg(windows)]
    mod windows {
        use std::fs::File;
        use std::io;
        use std::io::{Read, Seek, SeekFrom};
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(dst)
        }
    }
}
