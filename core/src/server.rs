/*
 * server.rs
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

//! Accept loop: one task per connection, optionally behind TLS.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::http::{serve_connection, Handler};
use crate::tls::TlsServer;

/// ALPN identifiers offered when TLS is enabled. The engine speaks
/// HTTP/1.1, so that is all we offer.
pub const ALPN_PROTOCOLS: &[&[u8]] = &[b"http/1.1"];

/// Accept connections forever, spawning a task per socket. Handshake and
/// per-connection failures are logged and never take the loop down.
pub async fn serve<H>(listener: TcpListener, tls: Option<TlsServer>, handler: Arc<H>) -> io::Result<()>
where
    H: Handler + 'static,
{
    let tls = tls.map(Arc::new);
    loop {
        let (socket, peer) = listener.accept().await?;
        let handler = handler.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let result = match tls {
                Some(tls) => match tls.accept(socket).await {
                    Ok((stream, proto)) => {
                        debug!("{}: TLS established, alpn {:?}", peer, proto);
                        serve_connection(stream, handler.as_ref()).await
                    }
                    Err(e) => {
                        warn!("{}: TLS handshake failed: {}", peer, e);
                        return;
                    }
                },
                None => serve_connection(socket, handler.as_ref()).await,
            };
            match result {
                Ok(()) => debug!("{}: connection closed", peer),
                Err(e) => debug!("{}: connection ended: {}", peer, e),
            }
        });
    }
}
