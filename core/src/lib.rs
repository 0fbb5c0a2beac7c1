/*
 * lib.rs
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

//! Collaudo core: the agent that runs on a disposable test image.
//!
//! A controller drives the agent over HTTP/1.1 (plain TCP or TLS with ALPN):
//! inspect image state, upload a payload as a tar stream, run child
//! processes, download result files, wipe the workspace, stop the image.
//!
//! Layering, leaves first:
//! - `chan`: pull-stream channel; procedural producers become readable
//!   streams without buffering their whole output.
//! - `filter`: byte-in/byte-out transformers (gzip) lifted onto streams.
//! - `tar`: streaming ustar writer/reader over any byte stream.
//! - `http`: HTTP/1.1 server engine with fixed or chunked response bodies.
//! - `tls`: server-side TLS with ALPN over an accepted socket.
//! - `agent`: the state machine tying it together; workspace I/O, process
//!   registry, persisted identity, routes.
//! - `server`: accept loop, one task per connection.

pub mod chan;
pub mod filter;
pub mod tar;

pub mod http;
pub mod tls;

pub mod agent;
pub mod server;

pub use agent::{App, AppConfig};
pub use server::serve;
