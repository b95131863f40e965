/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::ready;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::checksum::{DigestKind, Hasher};

type OnComplete = Box<dyn FnOnce(Bytes) + Send>;

pin_project! {
    /// Read-through decorator computing a digest over every byte read from the inner stream.
    ///
    /// When a read first observes end of stream the digest is finalized and handed to the
    /// completion callback, exactly once. Later reads report end of stream without polling
    /// the inner stream again. Streams nest, so several digests can be computed while the
    /// data is read a single time.
    pub struct HashingStream<R> {
        #[pin]
        inner: R,
        kind: DigestKind,
        hasher: Option<Box<dyn Hasher>>,
        on_complete: Option<OnComplete>,
    }
}

impl<R> HashingStream<R> {
    /// Wrap `inner`, invoking `on_complete` with the raw digest once `inner` is exhausted
    pub fn new(inner: R, kind: DigestKind, on_complete: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            inner,
            kind,
            hasher: Some(kind.hasher()),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Returns true once the digest has been finalized
    pub fn is_finished(&self) -> bool {
        self.hasher.is_none()
    }

    /// Consume the stream, returning the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> AsyncRead for HashingStream<R>
where
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        if this.hasher.is_none() {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let read = &buf.filled()[before..];

        if !read.is_empty() {
            if let Some(hasher) = this.hasher.as_mut() {
                hasher.update(read);
            }
        } else if buf.remaining() > 0 {
            // a zero byte read with room left in the buffer is end of stream
            if let Some(hasher) = this.hasher.take() {
                let digest = hasher.finish();
                tracing::trace!(kind = %this.kind, "digest finalized");
                if let Some(on_complete) = this.on_complete.take() {
                    on_complete(digest);
                }
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl<R> fmt::Debug for HashingStream<R>
where
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashingStream")
            .field("inner", &self.inner)
            .field("kind", &self.kind)
            .field("finished", &self.hasher.is_none())
            .finish()
    }
}
