/*
 * mod.rs
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

//! HTTP/1.1 server engine.
//!
//! - Buffers: `bytes` crate (`BytesMut` for the head, request bodies pre-fed
//!   from whatever was read past the head delimiter).
//! - One request at a time per connection; the response body is streamed out
//!   (Content-Length or chunked) before the next request is parsed.
//! - The handler gets the request body as a plain byte stream limited by
//!   Content-Length; it never sees framing.

mod headers;
mod request;
mod response;

pub mod h1;

pub use headers::{cmp_header_name, HeaderList};
pub use request::{Body, Request};
pub use response::{default_status_text, BodyStream, Response, ResponseBody};

pub mod connection;

pub use connection::{serve_connection, Handler};
