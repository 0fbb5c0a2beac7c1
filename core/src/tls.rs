/*
 * tls.rs
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

//! Server-side TLS with ALPN, wrapping an accepted socket with rustls.
//!
//! The certificate and key come from PEM files named on the command line.
//! The acceptor offers the configured ALPN identifiers and reports which one
//! the peer picked (empty if it did not ALPN). Underlying socket errors come
//! back out of TLS reads and writes as ordinary I/O errors; dropping the
//! stream tears the session down.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// A configured TLS acceptor, shared by all connection tasks.
pub struct TlsServer {
    acceptor: TlsAcceptor,
}

impl TlsServer {
    /// Build from PEM cert chain and private key files, offering `alpn`.
    /// rustls defaults apply otherwise: TLS 1.2 and 1.3, no client auth.
    pub fn from_pem_files(cert: &Path, key: &Path, alpn: &[&[u8]]) -> io::Result<Self> {
        let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(cert)?))
            .collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "no certificates in PEM file",
            ));
        }
        let key = rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key)?))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "no private key in PEM file")
            })?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Handshake on an accepted socket. Returns the TLS stream and the
    /// negotiated ALPN protocol, empty when the peer offered none.
    pub async fn accept(&self, socket: TcpStream) -> io::Result<(TlsStream<TcpStream>, String)> {
        let stream = self.acceptor.accept(socket).await?;
        let proto = stream
            .get_ref()
            .1
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        Ok((stream, proto))
    }
}
