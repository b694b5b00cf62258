/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::io::IoSlice;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// A stream wrapper that replays bytes consumed ahead of time, such as
    /// application payload buffered while reading a PROXY protocol header,
    /// before handing reads over to the inner stream. Writes always pass
    /// through untouched.
    pub struct RewindStream<S> {
        #[pin]
        inner: S,
        buffered: Option<Bytes>,
    }
}

impl<S> RewindStream<S> {
    pub fn new(inner: S, buffered: BytesMut) -> Self {
        let buffered = if buffered.is_empty() {
            None
        } else {
            Some(buffered.freeze())
        };
        RewindStream { inner, buffered }
    }

    pub fn buffered(&self) -> Option<&Bytes> {
        self.buffered.as_ref()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead> AsyncRead for RewindStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();

        if let Some(mut cache) = this.buffered.take() {
            let to_read = buf.remaining().min(cache.len());
            buf.put_slice(&cache.chunk()[0..to_read]);
            cache.advance(to_read);
            if !cache.is_empty() {
                *this.buffered = Some(cache);
            }
            Poll::Ready(Ok(()))
        } else {
            this.inner.poll_read(cx, buf)
        }
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncWrite for RewindStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
