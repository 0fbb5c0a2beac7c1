/*
 * response.rs
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

//! HTTP response: status, headers, and a body with one of two framings.
//!
//! A fixed-length body promises exactly `len` bytes and is sent with
//! `Content-Length`; a stream of unknown length is sent chunked. The body is
//! owned by the response and moved into the connection's draining step.

use std::io;

use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::error;

use crate::http::headers::HeaderList;

/// Owned byte stream used as a response body.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

pub enum ResponseBody {
    /// Exactly `len` bytes will be drained from `content`.
    Fixed { len: u64, content: BodyStream },
    /// Unknown length; sent with chunked transfer-encoding.
    Chunked(BodyStream),
}

pub struct Response {
    pub code: u16,
    /// Empty means "use the default text for the code".
    pub reason: String,
    pub headers: HeaderList,
    pub body: ResponseBody,
}

static STATUS_TEXTS: [(u16, &str); 3] = [(200, "OK"), (303, "See Other"), (404, "Not Found")];

pub fn default_status_text(code: u16) -> &'static str {
    for (c, text) in STATUS_TEXTS {
        if c == code {
            return text;
        }
    }
    "No Status Text"
}

impl Response {
    /// Bare status, empty body.
    pub fn status(code: u16) -> Self {
        Self {
            code,
            reason: String::new(),
            headers: HeaderList::new(),
            body: ResponseBody::Fixed {
                len: 0,
                content: Box::new(tokio::io::empty()),
            },
        }
    }

    /// Fixed-length `text/plain` body.
    pub fn text(code: u16, body: impl Into<String>) -> Self {
        let body = body.into().into_bytes();
        let mut resp = Self::status(code);
        resp.headers.push("content-type", "text/plain");
        resp.body = ResponseBody::Fixed {
            len: body.len() as u64,
            content: Box::new(io::Cursor::new(body)),
        };
        resp
    }

    /// Fixed-length `application/json` body, 200. Values here are small
    /// derive structs whose serialization cannot reasonably fail; if it does
    /// anyway, the controller gets a 500.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut resp = Self::status(200);
                resp.headers.push("content-type", "application/json");
                resp.body = ResponseBody::Fixed {
                    len: body.len() as u64,
                    content: Box::new(io::Cursor::new(body)),
                };
                resp
            }
            Err(e) => {
                error!("response serialization failed: {}", e);
                Self::text(500, "internal error")
            }
        }
    }

    /// Chunked body of unknown length, 200.
    pub fn stream(content: BodyStream) -> Self {
        let mut resp = Self::status(200);
        resp.body = ResponseBody::Chunked(content);
        resp
    }

    /// Replace the status code, keeping everything else.
    pub fn with_status(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_texts() {
        assert_eq!(default_status_text(200), "OK");
        assert_eq!(default_status_text(303), "See Other");
        assert_eq!(default_status_text(404), "Not Found");
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(default_status_text(201), "No Status Text");
        assert_eq!(default_status_text(500), "No Status Text");
    }

    #[test]
    fn text_sets_length_and_type() {
        let resp = Response::text(500, "boom");
        match resp.body {
            ResponseBody::Fixed { len, .. } => assert_eq!(len, 4),
            ResponseBody::Chunked(_) => panic!("expected fixed body"),
        }
        let ct: Vec<_> = resp
            .headers
            .iter()
            .filter(|(n, _)| *n == "content-type")
            .collect();
        assert_eq!(ct, [("content-type", "text/plain")]);
    }
}
