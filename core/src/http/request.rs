/*
 * request.rs
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

//! HTTP request: method, path, sorted headers, body stream.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, ReadBuf};

use crate::http::headers::HeaderList;

/// One parsed request, handed to the handler. The body borrows the
/// connection's read side for the duration of the handler call.
pub struct Request<'a> {
    pub method: String,
    pub path: String,
    pub headers: HeaderList,
    pub body: Body<'a>,
}

/// Request body: at most `Content-Length` bytes, fed first from whatever the
/// head read pulled past the delimiter, then from the socket. Methods without
/// a body get a zero-limit stream. Reading past the limit yields
/// end-of-stream; the peer closing inside the limit is an `UnexpectedEof`.
pub struct Body<'a> {
    prebuf: &'a mut BytesMut,
    stream: &'a mut (dyn AsyncRead + Send + Unpin),
    remaining: &'a mut u64,
}

impl<'a> Body<'a> {
    pub fn new(
        prebuf: &'a mut BytesMut,
        stream: &'a mut (dyn AsyncRead + Send + Unpin),
        remaining: &'a mut u64,
    ) -> Self {
        Self {
            prebuf,
            stream,
            remaining,
        }
    }

    /// Bytes not yet read out of this body.
    pub fn remaining(&self) -> u64 {
        *self.remaining
    }
}

impl AsyncRead for Body<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if *this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if !this.prebuf.is_empty() {
            let n = (*this.remaining)
                .min(this.prebuf.len() as u64)
                .min(buf.remaining() as u64) as usize;
            buf.put_slice(&this.prebuf.split_to(n));
            *this.remaining -= n as u64;
            return Poll::Ready(Ok(()));
        }
        let want = (*this.remaining).min(buf.remaining() as u64) as usize;
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(want));
        ready!(Pin::new(&mut *this.stream).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request body ended before Content-Length",
            )));
        }
        buf.advance(n);
        *this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn prebuffered_bytes_come_first() {
        let mut prebuf = BytesMut::from(&b"abc"[..]);
        let mut tail: &[u8] = b"de";
        let mut remaining = 5u64;
        let mut body = Body::new(&mut prebuf, &mut tail, &mut remaining);
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcde");
    }

    #[tokio::test]
    async fn limit_stops_before_pipelined_bytes() {
        let mut prebuf = BytesMut::from(&b"abcNEXT"[..]);
        let mut tail: &[u8] = b"";
        let mut remaining = 3u64;
        let mut body = Body::new(&mut prebuf, &mut tail, &mut remaining);
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        drop(body);
        assert_eq!(&prebuf[..], b"NEXT");
    }

    #[tokio::test]
    async fn early_socket_close_is_an_error() {
        let mut prebuf = BytesMut::new();
        let mut tail: &[u8] = b"ab";
        let mut remaining = 5u64;
        let mut body = Body::new(&mut prebuf, &mut tail, &mut remaining);
        let mut out = Vec::new();
        let err = body.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn zero_limit_is_immediate_eof() {
        let mut prebuf = BytesMut::from(&b"pipelined"[..]);
        let mut tail: &[u8] = b"more";
        let mut remaining = 0u64;
        let mut body = Body::new(&mut prebuf, &mut tail, &mut remaining);
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
