/*
 * parser.rs
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

//! HTTP/1.1 request-head parser: request line and header lines.
//!
//! The connection accumulates bytes until the blank line, then hands the
//! complete head here. Values are stripped of spaces and tabs; duplicate
//! names are preserved; headers come back sorted for binary-search lookup.

use std::io;

use crate::http::headers::HeaderList;

/// Parsed request line and headers, body not included.
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: HeaderList,
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed request: {}", msg))
}

/// Offset of the `CRLF CRLF` head delimiter, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Parse a complete head (everything through the blank line). Any deviation
/// from `METHOD SP PATH SP HTTP-VERSION` or `Name: Value` is a protocol
/// error; the connection closes without a response on those.
pub fn parse_request_head(mut head: &[u8]) -> io::Result<RequestHead> {
    let line_end = find_crlf(head).ok_or_else(|| protocol_error("missing request line"))?;
    let line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| protocol_error("request line is not valid UTF-8"))?;
    head = &head[line_end + 2..];

    let mut words = line.split(' ');
    let method = words.next().unwrap_or("");
    let path = words.next().unwrap_or("");
    let version = words.next().unwrap_or("");
    if method.is_empty() || path.is_empty() || words.next().is_some() {
        return Err(protocol_error("request line is not three tokens"));
    }
    if !version.starts_with("HTTP/") {
        return Err(protocol_error("bad HTTP version"));
    }

    let mut headers = HeaderList::new();
    loop {
        let line_end = find_crlf(head).ok_or_else(|| protocol_error("unterminated head"))?;
        if line_end == 0 {
            break;
        }
        let line = std::str::from_utf8(&head[..line_end])
            .map_err(|_| protocol_error("header line is not valid UTF-8"))?;
        head = &head[line_end + 2..];

        let colon = line
            .find(':')
            .ok_or_else(|| protocol_error("header line without a colon"))?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim_matches([' ', '\t']);
        headers.push(name, value);
    }
    headers.sort();

    Ok(RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        headers,
    })
}
