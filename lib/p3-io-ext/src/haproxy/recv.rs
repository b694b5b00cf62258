/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

const READ_CHUNK_SIZE: usize = 64;
const OVER_READ_EXTRA: usize = 512;

pub(super) enum FillError {
    TimedOut,
    Closed,
    Read(io::Error),
}

/// Buffer for all bytes read from a connection while its PROXY protocol
/// header phase is running. Bytes are appended in arrival order and are
/// never read from the socket twice, so the buffer content plus whatever
/// is still unread in the socket is exactly the byte stream the peer sent.
/// All reads share the one deadline fixed at creation time.
pub(super) struct HeaderRecvBuf {
    deadline: Instant,
    buf: BytesMut,
}

impl HeaderRecvBuf {
    pub(super) fn new(timeout: Duration) -> Self {
        HeaderRecvBuf {
            deadline: Instant::now() + timeout,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(super) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(super) fn take_all(self) -> BytesMut {
        self.buf
    }

    pub(super) fn split_leftover(mut self, consumed: usize) -> BytesMut {
        self.buf.split_off(consumed)
    }

    /// Fill the buffer up to offset `end`, accumulating across short reads.
    /// Reads never cross `end`, so no byte past it can get buffered.
    pub(super) async fn fill_exact<R>(&mut self, reader: &mut R, end: usize) -> Result<(), FillError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while self.buf.len() < end {
            let want = (end - self.buf.len()).min(READ_CHUNK_SIZE);
            let nr = match tokio::time::timeout_at(self.deadline, reader.read(&mut chunk[..want]))
                .await
            {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(FillError::Read(e)),
                Err(_) => return Err(FillError::TimedOut),
            };
            if nr == 0 {
                return Err(FillError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..nr]);
        }
        Ok(())
    }

    /// Fill the buffer up to at least offset `end`. Reads go into spare
    /// capacity and may buffer bytes past `end`; the caller hands those
    /// over as leftover.
    pub(super) async fn fill_at_least<R>(
        &mut self,
        reader: &mut R,
        end: usize,
    ) -> Result<(), FillError>
    where
        R: AsyncRead + Unpin,
    {
        if self.buf.len() >= end {
            return Ok(());
        }
        self.buf.reserve(end - self.buf.len() + OVER_READ_EXTRA);
        while self.buf.len() < end {
            let nr = match tokio::time::timeout_at(self.deadline, reader.read_buf(&mut self.buf))
                .await
            {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(FillError::Read(e)),
                Err(_) => return Err(FillError::TimedOut),
            };
            if nr == 0 {
                return Err(FillError::Closed);
            }
        }
        Ok(())
    }
}
