/*
 * connection.rs
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

//! Per-connection request loop.
//!
//! Parse one head, hand the handler a request whose body streams straight
//! off the socket, then drain the response body out (Content-Length or
//! chunked) before looking at the next request. Bytes read past the current
//! request stay in the buffer and seed the next head. A malformed head or a
//! body framing violation ends the connection; an idle keep-alive times out
//! after 30 seconds.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::http::h1::{find_head_end, parse_request_head};
use crate::http::request::{Body, Request};
use crate::http::response::{default_status_text, Response, ResponseBody};

/// A request head larger than this kills the connection.
const HEAD_MAX: usize = 64 * 1024;

/// How long an idle keep-alive connection may sit between requests.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that turns requests into responses.
pub trait Handler: Send + Sync {
    fn handle(&self, req: Request<'_>) -> impl Future<Output = Response> + Send;
}

/// Serve one connection until the peer goes away, the keep-alive idles out,
/// or a protocol error makes the stream unusable.
pub async fn serve_connection<S, H>(stream: S, handler: &H) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    H: Handler,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let head_end = match read_head(&mut rd, &mut buf).await? {
            Some(n) => n,
            None => return Ok(()),
        };
        let head_bytes = buf.split_to(head_end + 4);
        let mut head = parse_request_head(&head_bytes)?;

        // Body framing follows the method as sent, before HEAD normalization.
        let has_body = head.method == "POST" || head.method == "PUT";
        let mut body_remaining: u64 = if has_body {
            head.headers
                .get_single("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        } else {
            0
        };
        if head.method == "HEAD" {
            head.method = "GET".to_string();
        }

        let method = head.method.clone();
        let path = head.path.clone();

        let resp = {
            let body = Body::new(&mut buf, &mut rd, &mut body_remaining);
            let req = Request {
                method: head.method,
                path: head.path,
                headers: head.headers,
                body,
            };
            handler.handle(req).await
        };

        drain_request_body(&mut rd, &mut buf, &mut body_remaining).await?;

        debug!("{} {} {}", method, path, resp.code);
        write_response(&mut wr, resp).await?;
    }
}

/// Fill `buf` until it holds a complete head. `None` means the connection is
/// done cleanly: the peer closed between requests, or the idle timer fired.
async fn read_head<R>(rd: &mut R, buf: &mut BytesMut) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(n) = find_head_end(buf) {
            return Ok(Some(n));
        }
        if buf.len() >= HEAD_MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head exceeds 64 KiB",
            ));
        }
        let idle = buf.is_empty();
        let n = if idle {
            match tokio::time::timeout(IDLE_TIMEOUT, rd.read_buf(buf)).await {
                Ok(r) => r?,
                Err(_) => return Ok(None),
            }
        } else {
            rd.read_buf(buf).await?
        };
        if n == 0 {
            if idle {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a request head",
            ));
        }
    }
}

/// Discard whatever the handler left unread so the stream lines up with the
/// next request.
async fn drain_request_body<R>(rd: &mut R, buf: &mut BytesMut, remaining: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    if *remaining == 0 {
        return Ok(());
    }
    let take = (*remaining).min(buf.len() as u64) as usize;
    buf.advance(take);
    *remaining -= take as u64;

    let mut scratch = vec![0u8; 8 * 1024];
    while *remaining > 0 {
        let want = (*remaining).min(scratch.len() as u64) as usize;
        let n = rd.read(&mut scratch[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request body ended before Content-Length",
            ));
        }
        *remaining -= n as u64;
    }
    Ok(())
}

async fn write_response<W>(wr: &mut W, resp: Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Response {
        code,
        reason,
        mut headers,
        body,
    } = resp;

    match &body {
        ResponseBody::Fixed { len, .. } => headers.push("content-length", len.to_string()),
        ResponseBody::Chunked(_) => headers.push("transfer-encoding", "chunked"),
    }
    let reason = if reason.is_empty() {
        default_status_text(code).to_string()
    } else {
        reason
    };

    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", code, reason).as_bytes());
    for (name, value) in headers.iter() {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    wr.write_all(&head).await?;

    let mut chunk = vec![0u8; 16 * 1024];
    match body {
        ResponseBody::Fixed { len, mut content } => {
            let mut remaining = len;
            while remaining > 0 {
                let want = remaining.min(chunk.len() as u64) as usize;
                let n = content.read(&mut chunk[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "response body ended before its declared length",
                    ));
                }
                wr.write_all(&chunk[..n]).await?;
                remaining -= n as u64;
            }
        }
        ResponseBody::Chunked(mut content) => loop {
            let n = content.read(&mut chunk).await?;
            if n == 0 {
                wr.write_all(b"0\r\n\r\n").await?;
                break;
            }
            wr.write_all(format!("{:x}\r\n", n).as_bytes()).await?;
            wr.write_all(&chunk[..n]).await?;
            wr.write_all(b"\r\n").await?;
        },
    }
    wr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    struct TestHandler;

    impl Handler for TestHandler {
        fn handle(&self, mut req: Request<'_>) -> impl Future<Output = Response> + Send {
            async move {
                match (req.method.as_str(), req.path.as_str()) {
                    ("GET", "/hello") => Response::text(200, "hello"),
                    ("POST", "/echo") => {
                        let mut data = Vec::new();
                        req.body.read_to_end(&mut data).await.unwrap();
                        Response::text(200, String::from_utf8(data).unwrap())
                    }
                    ("GET", "/stream") => {
                        Response::stream(Box::new(io::Cursor::new(b"abcde".to_vec())))
                    }
                    ("POST", "/ignore-body") => Response::status(200),
                    _ => Response::status(404),
                }
            }
        }
    }

    fn start() -> DuplexStream {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = serve_connection(server, &TestHandler).await;
        });
        client
    }

    const HELLO_RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello";
    const EMPTY_OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n";

    /// Read exactly `n` bytes, leaving any pipelined rest buffered.
    async fn read_exactly(client: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        client.read_exact(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn fixed_length_response() {
        let mut client = start();
        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        let got = read_exactly(&mut client, HELLO_RESPONSE.len()).await;
        assert_eq!(got, HELLO_RESPONSE);
    }

    #[tokio::test]
    async fn chunked_framing_is_exact() {
        let mut client = start();
        client.write_all(b"GET /stream HTTP/1.1\r\n\r\n").await.unwrap();
        let expect = b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nabcde\r\n0\r\n\r\n";
        let got = read_exactly(&mut client, expect.len()).await;
        assert_eq!(got, expect);
    }

    #[tokio::test]
    async fn keep_alive_serves_sequential_requests() {
        let mut client = start();
        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        let first = read_exactly(&mut client, HELLO_RESPONSE.len()).await;
        assert_eq!(first, HELLO_RESPONSE);

        client.write_all(b"GET /nope HTTP/1.1\r\n\r\n").await.unwrap();
        let expect = b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n";
        let second = read_exactly(&mut client, expect.len()).await;
        assert_eq!(second, expect);
    }

    #[tokio::test]
    async fn request_body_honors_content_length() {
        let mut client = start();
        client
            .write_all(b"POST /echo HTTP/1.1\r\ncontent-length: 4\r\n\r\npingGET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let expect = b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 4\r\n\r\nping";
        let got = read_exactly(&mut client, expect.len()).await;
        assert_eq!(got, expect);
        // the pipelined second request is answered from the same buffer
        let second = read_exactly(&mut client, HELLO_RESPONSE.len()).await;
        assert_eq!(second, HELLO_RESPONSE);
    }

    #[tokio::test]
    async fn unread_request_body_is_drained_before_reuse() {
        let mut client = start();
        client
            .write_all(b"POST /ignore-body HTTP/1.1\r\ncontent-length: 6\r\n\r\nwasted")
            .await
            .unwrap();
        let first = read_exactly(&mut client, EMPTY_OK_RESPONSE.len()).await;
        assert_eq!(first, EMPTY_OK_RESPONSE);

        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        let second = read_exactly(&mut client, HELLO_RESPONSE.len()).await;
        assert_eq!(second, HELLO_RESPONSE);
    }

    #[tokio::test]
    async fn head_is_routed_as_get() {
        let mut client = start();
        client.write_all(b"HEAD /hello HTTP/1.1\r\n\r\n").await.unwrap();
        // engine policy: the body is streamed even for HEAD
        let got = read_exactly(&mut client, HELLO_RESPONSE.len()).await;
        assert_eq!(got, HELLO_RESPONSE);
    }

    #[tokio::test]
    async fn malformed_request_line_closes_without_response() {
        let mut client = start();
        client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn status_without_text_uses_fallback() {
        let mut client = start();
        client
            .write_all(b"POST /ignore-body HTTP/1.1\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        let got = read_exactly(&mut client, EMPTY_OK_RESPONSE.len()).await;
        assert_eq!(got, EMPTY_OK_RESPONSE);
    }
}
