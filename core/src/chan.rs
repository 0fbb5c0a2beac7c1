/*
 * chan.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Collaudo, a remote test agent.
 *
 * Collaudo is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Collaudo is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Collaudo.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Pull-stream channel: turn a block of producer code into a readable stream.
//!
//! `make_reader` hands the producer a [`ChanWriter`] and returns a
//! [`ChanReader`]. Bytes come out in write order; a write only makes progress
//! while the reader keeps reading, so at most one pipe buffer is ever in
//! flight. Dropping the reader before the producer is done fails the
//! producer's next write with `BrokenPipe`. A producer error is logged and
//! swallowed; the reader just sees end-of-stream early. There is no
//! out-of-band error signal, which is what lets the HTTP engine treat a
//! response body as a plain byte stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

/// In-flight pipe capacity. Writes larger than this are split; the producer
/// resumes as the reader drains.
const PIPE_CAPACITY: usize = 8 * 1024;

/// Read side of the channel. End-of-stream once the producer returns.
pub struct ChanReader {
    inner: DuplexStream,
}

/// Write side of the channel, owned by the producer for its lifetime.
pub struct ChanWriter {
    inner: DuplexStream,
}

/// Spawn `producer` and return a stream of the bytes it writes.
///
/// The producer runs only as fast as the reader consumes. Its `Err` return is
/// not surfaced to the reader; callers that need a failure signal must encode
/// it in the byte stream itself.
pub fn make_reader<F, Fut>(producer: F) -> ChanReader
where
    F: FnOnce(ChanWriter) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = io::Result<()>> + Send + 'static,
{
    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        match producer(ChanWriter { inner: near }).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                // Reader went away first; unwinding is the point.
                debug!("pull-stream producer cancelled: {}", e);
            }
            Err(e) => debug!("pull-stream producer failed: {}", e),
        }
        // Dropping the writer here is what delivers EOF to the reader.
    });
    ChanReader { inner: far }
}

impl AsyncRead for ChanReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChanWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn producer_bytes_arrive_in_order() {
        let data = pattern(40_000);
        let expect = data.clone();
        let mut rd = make_reader(move |mut w| async move {
            // Uneven write sizes on purpose.
            for chunk in data.chunks(613) {
                w.write_all(chunk).await?;
            }
            Ok(())
        });
        let mut got = Vec::new();
        rd.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, expect);
    }

    #[tokio::test]
    async fn any_consumer_buffer_size_yields_same_bytes() {
        for buf_size in [1usize, 7, 512, 4096] {
            let data = pattern(9_973);
            let expect = data.clone();
            let mut rd = make_reader(move |mut w| async move {
                w.write_all(&data).await?;
                Ok(())
            });
            let mut got = Vec::new();
            let mut buf = vec![0u8; buf_size];
            loop {
                let n = rd.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                got.extend_from_slice(&buf[..n]);
            }
            assert_eq!(got, expect, "buffer size {}", buf_size);
        }
    }

    #[tokio::test]
    async fn dropping_reader_breaks_producer_pipe() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut rd = make_reader(move |mut w| async move {
            let block = [0u8; 512];
            loop {
                if let Err(e) = w.write_all(&block).await {
                    let _ = tx.send(e.kind());
                    return Err(e);
                }
            }
        });
        let mut buf = [0u8; 256];
        rd.read(&mut buf).await.unwrap();
        drop(rd);
        assert_eq!(rx.await.unwrap(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn producer_error_is_early_eof_for_reader() {
        let mut rd = make_reader(|mut w| async move {
            w.write_all(b"partial").await?;
            Err(io::Error::new(io::ErrorKind::Other, "producer blew up"))
        });
        let mut got = Vec::new();
        rd.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"partial");
    }

    #[tokio::test]
    async fn empty_producer_is_immediate_eof() {
        let mut rd = make_reader(|_w| async move { Ok(()) });
        let mut got = Vec::new();
        rd.read_to_end(&mut got).await.unwrap();
        assert!(got.is_empty());
    }
}
