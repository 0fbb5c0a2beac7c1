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

//! The agent: image status, workspace, process registry, persisted identity.
//!
//! One mutex guards the mutable state (status, stopping flag, registry);
//! handlers take it only around the mutating region. Streaming bodies run
//! outside the lock: `GET /tar` hands a producer to the pull-stream channel
//! and the HTTP engine drains it chunk by chunk.

pub mod exec;
pub mod state;
pub mod workspace;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite};
use tracing::warn;

use crate::chan;
use crate::filter::{FilterReader, FilterWriter, GzipFilter};
use crate::http::{Handler, Request, Response};
use crate::tar::{TarReader, TarWriter};

use exec::ProcInfo;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    Clean,
    Dirty,
    Unpure,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Clean => "clean",
            Status::Dirty => "dirty",
            Status::Unpure => "unpure",
        }
    }
}

pub struct AppConfig {
    pub image_name: String,
    pub workspace: PathBuf,
    pub stop_cmd: Option<String>,
    pub state_file: PathBuf,
}

struct Inner {
    status: Status,
    stopping: bool,
    /// Exit code of the stop command, captured best-effort. Diagnostic only;
    /// a stop failure never fails the request.
    #[allow(dead_code)]
    error: i32,
    processes: Vec<ProcInfo>,
}

pub struct App {
    image_name: String,
    workspace: PathBuf,
    stop_cmd: Option<String>,
    agent_uuid: String,
    session_count: u64,
    inner: Mutex<Inner>,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    status: &'static str,
    name: &'a str,
}

#[derive(Serialize)]
struct ExecReport {
    id: usize,
    command: Vec<String>,
    exit_code: Option<i32>,
    pure: bool,
}

#[derive(Deserialize)]
struct ExecRequest {
    cmd: Vec<String>,
    pure: bool,
}

impl App {
    /// Load the persisted identity, count this session, and start clean.
    pub fn open(config: AppConfig) -> io::Result<App> {
        let state = state::open_session(&config.state_file)?;
        Ok(App {
            image_name: config.image_name,
            workspace: config.workspace,
            stop_cmd: config.stop_cmd,
            agent_uuid: state.agent_uuid,
            session_count: state.session_count,
            inner: Mutex::new(Inner {
                status: Status::Clean,
                stopping: false,
                error: 0,
                processes: Vec::new(),
            }),
        })
    }

    pub fn agent_uuid(&self) -> &str {
        &self.agent_uuid
    }

    pub fn session_count(&self) -> u64 {
        self.session_count
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_image(&self) -> Response {
        let inner = self.lock();
        let status = if inner.stopping {
            "stopping"
        } else {
            inner.status.as_str()
        };
        Response::json(&ImageReport {
            status,
            name: &self.image_name,
        })
    }

    async fn stop_image(&self) -> Response {
        let Some(cmd) = self.stop_cmd.as_deref() else {
            return Response::status(404);
        };
        let first = {
            let mut inner = self.lock();
            if inner.stopping {
                false
            } else {
                inner.stopping = true;
                true
            }
        };
        if first {
            let code = exec::run_shell(cmd).await;
            self.lock().error = code;
        }
        Response::status(303).header("location", "/image")
    }

    fn get_tar(&self, gzip: bool) -> Response {
        let workspace = self.workspace.clone();
        let body = if gzip {
            chan::make_reader(move |w| async move {
                let packed = FilterWriter::new(w, GzipFilter::new(true));
                write_workspace_tar(workspace, packed).await
            })
        } else {
            chan::make_reader(move |w| async move { write_workspace_tar(workspace, w).await })
        };
        let content_type = if gzip {
            "application/x-gzip"
        } else {
            "application/x-tar"
        };
        Response::stream(Box::new(body)).header("content-type", content_type)
    }

    async fn post_tar(&self, req: &mut Request<'_>) -> io::Result<Response> {
        let unpacked = match req.headers.get_single("content-type") {
            Some("application/x-gzip") => {
                let unzipped = FilterReader::new(&mut req.body, GzipFilter::new(false));
                self.unpack(unzipped).await
            }
            Some("application/x-tar") => self.unpack(&mut req.body).await,
            _ => return Ok(Response::status(406)),
        };
        match unpacked {
            Ok(()) => {
                let mut inner = self.lock();
                if inner.status == Status::Clean {
                    inner.status = Status::Dirty;
                }
                Ok(Response::status(200))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
                ) =>
            {
                Ok(Response::text(400, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn unpack<R>(&self, src: R) -> io::Result<()>
    where
        R: tokio::io::AsyncRead + Send + Unpin,
    {
        let mut archive = TarReader::new(src);
        while let Some(mut entry) = archive.next().await? {
            let Some(rel) = workspace::confine(&entry.name) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("tar entry escapes the workspace: {}", entry.name),
                ));
            };
            let dest = self.workspace.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut out = tokio::fs::File::create(&dest).await?;
            tokio::io::copy(&mut entry, &mut out).await?;
        }
        Ok(())
    }

    async fn get_file(&self, name: &str) -> io::Result<Response> {
        let Some(rel) = workspace::confine(name) else {
            return Ok(Response::status(404));
        };
        match tokio::fs::File::open(self.workspace.join(rel)).await {
            Ok(file) => Ok(Response::stream(Box::new(file))
                .header("content-type", "application/octet-stream")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Response::status(404)),
            Err(e) => Ok(Response::text(500, e.to_string())),
        }
    }

    async fn delete_tree(&self) -> Response {
        match tokio::fs::remove_dir_all(&self.workspace).await {
            Ok(()) => Response::status(200),
            Err(e) => Response::text(500, e.to_string()),
        }
    }

    async fn start_exec(&self, req: &mut Request<'_>) -> io::Result<Response> {
        let mut raw = Vec::new();
        req.body.read_to_end(&mut raw).await?;
        let Ok(request) = serde_json::from_slice::<ExecRequest>(&raw) else {
            return Ok(Response::status(400));
        };
        if request.cmd.is_empty() {
            return Ok(Response::status(400));
        }

        let child = exec::spawn(&request.cmd)?;

        let (id, report) = {
            let mut inner = self.lock();
            let id = inner.processes.len();
            inner
                .processes
                .push(ProcInfo::new(request.cmd, request.pure, child));
            if !inner.processes[id].pure {
                inner.status = Status::Unpure;
            }
            (id, Self::report(&mut inner.processes[id], id))
        };

        let location = format!("exec/{}-{}", self.agent_uuid, id);
        Ok(Response::json(&report)
            .with_status(201)
            .header("location", location))
    }

    fn get_exec(&self, id: &str) -> Response {
        if id.len() < 37 || !id.starts_with(self.agent_uuid.as_str()) || id.as_bytes()[36] != b'-'
        {
            return Response::status(404);
        }
        let index = &id[37..];
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Response::status(404);
        }
        let Ok(index) = index.parse::<usize>() else {
            return Response::status(404);
        };
        let mut inner = self.lock();
        let Some(process) = inner.processes.get_mut(index) else {
            return Response::status(404);
        };
        Response::json(&Self::report(process, index))
    }

    fn report(process: &mut ProcInfo, id: usize) -> ExecReport {
        ExecReport {
            id,
            command: process.cmd.clone(),
            exit_code: process.poll_exit(),
            pure: process.pure,
        }
    }

    async fn route(&self, req: &mut Request<'_>) -> io::Result<Response> {
        let (path, query) = match req.path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (req.path.clone(), None),
        };
        let method = req.method.clone();

        if let Some(name) = path.strip_prefix("/files/") {
            if method == "GET" {
                return self.get_file(name).await;
            }
        }
        if path == "/exec/" && method == "POST" {
            return self.start_exec(req).await;
        }
        if let Some(id) = path.strip_prefix("/exec/") {
            if method == "GET" {
                return Ok(self.get_exec(id));
            }
        }
        match (method.as_str(), path.as_str()) {
            ("GET", "/image") => Ok(self.get_image()),
            ("POST", "/image/stop") => Ok(self.stop_image().await),
            ("GET", "/tar") => Ok(self.get_tar(query.as_deref() == Some("gzip"))),
            ("POST", "/tar") => self.post_tar(req).await,
            ("DELETE", "/tree") => Ok(self.delete_tree().await),
            _ => Ok(Response::status(404)),
        }
    }
}

impl Handler for App {
    fn handle(&self, mut req: Request<'_>) -> impl Future<Output = Response> + Send {
        async move {
            match self.route(&mut req).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("{} {} failed: {}", req.method, req.path, e);
                    Response::text(500, e.to_string())
                }
            }
        }
    }
}

/// Tar up every workspace file into `out`, closing it at the end so the
/// terminator (and, through a gzip writer, the trailer) is flushed.
async fn write_workspace_tar<W>(workspace: PathBuf, out: W) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    let mut archive = TarWriter::new(out);
    for name in workspace::enum_files(&workspace)? {
        let path = workspace.join(&name);
        let meta = tokio::fs::metadata(&path).await?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut file = tokio::fs::File::open(&path).await?;
        archive.add(&name, meta.len(), mtime, &mut file).await?;
    }
    archive.close().await?;
    Ok(())
}
