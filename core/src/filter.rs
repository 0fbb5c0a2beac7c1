/*
 * filter.rs
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

//! Byte-in/byte-out filters and the adapters that lift them onto streams.
//!
//! A [`Filter`] transforms some input into some output; either side of a
//! step may be empty. [`FilterWriter`] pushes written bytes through the
//! filter into a downstream writer; [`FilterReader`] pulls upstream bytes
//! through the filter on demand. [`GzipFilter`] is the one concrete filter:
//! gzip compression or decompression selected at construction.

use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Adapter working-buffer size.
const BUF_SIZE: usize = 8 * 1024;

/// Cap on input fed to the codec per step, so pending output stays bounded.
const MAX_STEP: usize = 4 * 1024;

/// A streaming byte transformer.
pub trait Filter: Send {
    /// Process some input into some output. Returns `(consumed, produced)`;
    /// either count may be zero.
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> io::Result<(usize, usize)>;

    /// Flush remaining output after all input was fed. Returns 0 once the
    /// filter is fully drained.
    fn finish(&mut self, output: &mut [u8]) -> io::Result<usize>;
}

fn compression_error(e: io::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("compression error: {}", e))
}

enum GzCodec {
    Compress(GzEncoder<Vec<u8>>),
    Decompress(GzDecoder<Vec<u8>>),
}

impl GzCodec {
    fn write(&mut self, input: &[u8]) -> io::Result<usize> {
        match self {
            GzCodec::Compress(e) => e.write(input),
            GzCodec::Decompress(d) => d.write(input),
        }
    }

    fn try_finish(&mut self) -> io::Result<()> {
        match self {
            GzCodec::Compress(e) => e.try_finish(),
            GzCodec::Decompress(d) => d.try_finish(),
        }
    }

    fn pending(&mut self) -> &mut Vec<u8> {
        match self {
            GzCodec::Compress(e) => e.get_mut(),
            GzCodec::Decompress(d) => d.get_mut(),
        }
    }
}

/// Gzip encoder or decoder behind the [`Filter`] interface.
pub struct GzipFilter {
    codec: Option<GzCodec>,
    finished: bool,
}

impl GzipFilter {
    /// `compress == true` encodes, `false` decodes.
    pub fn new(compress: bool) -> Self {
        let codec = if compress {
            GzCodec::Compress(GzEncoder::new(Vec::new(), Compression::default()))
        } else {
            GzCodec::Decompress(GzDecoder::new(Vec::new()))
        };
        Self {
            codec: Some(codec),
            finished: false,
        }
    }

    fn drain(pending: &mut Vec<u8>, output: &mut [u8]) -> usize {
        let n = pending.len().min(output.len());
        output[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        n
    }
}

impl Filter for GzipFilter {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> io::Result<(usize, usize)> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok((0, 0));
        };
        let drained = Self::drain(codec.pending(), output);
        if drained > 0 || input.is_empty() || output.is_empty() {
            return Ok((0, drained));
        }
        let step = input.len().min(MAX_STEP);
        let consumed = codec.write(&input[..step]).map_err(compression_error)?;
        let produced = Self::drain(codec.pending(), output);
        Ok((consumed, produced))
    }

    fn finish(&mut self, output: &mut [u8]) -> io::Result<usize> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(0);
        };
        if !self.finished {
            codec.try_finish().map_err(compression_error)?;
            self.finished = true;
        }
        let drained = Self::drain(codec.pending(), output);
        if drained == 0 && codec.pending().is_empty() {
            self.codec = None;
        }
        Ok(drained)
    }
}

fn stalled() -> io::Error {
    io::Error::other("filter made no progress")
}

/// Writer adapter: bytes written here are filtered and forwarded downstream.
/// `shutdown` drains the filter's `finish` output before shutting the
/// downstream writer.
pub struct FilterWriter<W, F> {
    downstream: W,
    filter: F,
    out: Box<[u8]>,
    pos: usize,
    len: usize,
    finished: bool,
}

impl<W: AsyncWrite + Unpin, F: Filter> FilterWriter<W, F> {
    pub fn new(downstream: W, filter: F) -> Self {
        Self {
            downstream,
            filter,
            out: vec![0u8; BUF_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            finished: false,
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.pos < self.len {
            let n = ready!(
                Pin::new(&mut self.downstream).poll_write(cx, &self.out[self.pos..self.len])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pos += n;
        }
        self.pos = 0;
        self.len = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin, F: Filter + Unpin> AsyncWrite for FilterWriter<W, F> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            ready!(this.poll_drain(cx))?;
            let (consumed, produced) = this.filter.process(buf, &mut this.out)?;
            this.pos = 0;
            this.len = produced;
            if consumed > 0 {
                return Poll::Ready(Ok(consumed));
            }
            if produced == 0 {
                return Poll::Ready(Err(stalled()));
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.downstream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_drain(cx))?;
            if !this.finished {
                let produced = this.filter.finish(&mut this.out)?;
                if produced > 0 {
                    this.pos = 0;
                    this.len = produced;
                    continue;
                }
                this.finished = true;
            }
            ready!(Pin::new(&mut this.downstream).poll_flush(cx))?;
            return Pin::new(&mut this.downstream).poll_shutdown(cx);
        }
    }
}

/// Reader adapter: pulls from upstream, filters, and hands the output to the
/// caller. After upstream EOF the filter's `finish` output is drained; EOF
/// here means the filter is fully done.
pub struct FilterReader<R, F> {
    upstream: R,
    filter: F,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin, F: Filter> FilterReader<R, F> {
    pub fn new(upstream: R, filter: F) -> Self {
        Self {
            upstream,
            filter,
            buf: vec![0u8; BUF_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            eof: false,
        }
    }
}

impl<R: AsyncRead + Unpin, F: Filter + Unpin> AsyncRead for FilterReader<R, F> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if this.pos < this.len {
                let (consumed, produced) = this
                    .filter
                    .process(&this.buf[this.pos..this.len], out.initialize_unfilled())?;
                this.pos += consumed;
                if produced > 0 {
                    out.advance(produced);
                    return Poll::Ready(Ok(()));
                }
                if consumed == 0 {
                    return Poll::Ready(Err(stalled()));
                }
                continue;
            }
            if !this.eof {
                this.pos = 0;
                this.len = 0;
                let mut rb = ReadBuf::new(&mut this.buf);
                ready!(Pin::new(&mut this.upstream).poll_read(cx, &mut rb))?;
                let n = rb.filled().len();
                if n == 0 {
                    this.eof = true;
                } else {
                    this.len = n;
                }
                continue;
            }
            let produced = this.filter.finish(out.initialize_unfilled())?;
            out.advance(produced);
            return Poll::Ready(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..5_000u32 {
            data.extend_from_slice(format!("line {} of the payload\n", i).as_bytes());
        }
        data
    }

    async fn compress(data: &[u8]) -> Vec<u8> {
        let mut w = FilterWriter::new(Vec::new(), GzipFilter::new(true));
        w.write_all(data).await.unwrap();
        w.shutdown().await.unwrap();
        w.downstream
    }

    #[tokio::test]
    async fn writer_output_is_real_gzip() {
        let data = sample();
        let packed = compress(&data).await;
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);

        let mut unpacked = Vec::new();
        flate2::read::GzDecoder::new(&packed[..])
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, data);
    }

    #[tokio::test]
    async fn reader_round_trips_writer_output() {
        let data = sample();
        let packed = compress(&data).await;

        let mut rd = FilterReader::new(&packed[..], GzipFilter::new(false));
        let mut unpacked = Vec::new();
        rd.read_to_end(&mut unpacked).await.unwrap();
        assert_eq!(unpacked, data);
    }

    #[tokio::test]
    async fn reader_with_tiny_consumer_buffer() {
        let data = b"tiny but still worth compressing".repeat(64);
        let packed = compress(&data).await;

        let mut rd = FilterReader::new(&packed[..], GzipFilter::new(false));
        let mut unpacked = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = rd.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            unpacked.extend_from_slice(&buf[..n]);
        }
        assert_eq!(unpacked, data);
    }

    #[tokio::test]
    async fn corrupt_input_is_a_compression_error() {
        let garbage = b"definitely not a gzip stream, not even close";
        let mut rd = FilterReader::new(&garbage[..], GzipFilter::new(false));
        let mut out = Vec::new();
        let err = rd.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_input_fails_at_finish() {
        let data = sample();
        let packed = compress(&data).await;
        let truncated = &packed[..packed.len() / 2];

        let mut rd = FilterReader::new(truncated, GzipFilter::new(false));
        let mut out = Vec::new();
        assert!(rd.read_to_end(&mut out).await.is_err());
    }
}
