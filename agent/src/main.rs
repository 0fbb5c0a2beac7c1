/*
 * main.rs
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

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use collaudo_core::agent::state;
use collaudo_core::server::{serve, ALPN_PROTOCOLS};
use collaudo_core::tls::TlsServer;
use collaudo_core::{App, AppConfig};

#[derive(Parser)]
#[command(name = "collaudo", about = "Remote test agent", version)]
struct Cli {
    /// Image name reported by GET /image
    image_name: String,

    /// Directory managed as the payload workspace
    workspace: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Command run once when the controller posts /image/stop
    #[arg(long)]
    stop_cmd: Option<String>,

    /// PEM private key; TLS is enabled when both key and cert are given
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// PEM certificate chain
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let state_file = state::default_state_file()
        .ok_or_else(|| anyhow::anyhow!("no local app-data directory for this user"))?;
    let app = App::open(AppConfig {
        image_name: cli.image_name,
        workspace: cli.workspace,
        stop_cmd: cli.stop_cmd,
        state_file,
    })?;
    info!(
        "agent {} starting session {}",
        app.agent_uuid(),
        app.session_count()
    );

    let tls = match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => Some(TlsServer::from_pem_files(cert, key, ALPN_PROTOCOLS)?),
        _ => None,
    };

    let listener = TcpListener::bind(("0.0.0.0", cli.port)).await?;
    info!(
        "listening on port {}{}",
        cli.port,
        if tls.is_some() { " (TLS)" } else { "" }
    );
    serve(listener, tls, Arc::new(app)).await?;
    Ok(())
}
