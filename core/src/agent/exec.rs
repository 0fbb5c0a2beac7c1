/*
 * exec.rs
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

//! Child processes started for the controller.
//!
//! The registry entry keeps the argv, the controller's purity hint, and the
//! child handle until it exits; the exit code is cached so later polls keep
//! answering after the child is reaped. Indices into the registry are dense
//! and assigned in spawn order; the registry does not survive a restart.

use tokio::process::{Child, Command};
use tracing::warn;

pub struct ProcInfo {
    pub cmd: Vec<String>,
    pub pure: bool,
    child: Option<Child>,
    exit_code: Option<i32>,
}

impl ProcInfo {
    pub fn new(cmd: Vec<String>, pure: bool, child: Child) -> Self {
        Self {
            cmd,
            pure,
            child: Some(child),
            exit_code: None,
        }
    }

    /// Non-blocking exit poll. `None` while the child still runs; a child
    /// killed by a signal reports -1.
    pub fn poll_exit(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.exit_code = Some(status.code().unwrap_or(-1));
                        self.child = None;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("polling child failed: {}", e),
                }
            }
        }
        self.exit_code
    }
}

/// Spawn argv[0] with the remaining arguments. No shell involved.
pub fn spawn(cmd: &[String]) -> std::io::Result<Child> {
    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]);
    command.spawn()
}

/// Run a configured command line through the platform shell and wait for it.
/// Best-effort: failure to spawn reports as exit code -1.
pub async fn run_shell(cmd: &str) -> i32 {
    #[cfg(unix)]
    let mut command = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    #[cfg(windows)]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    };
    match command.status().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!("stop command failed to spawn: {}", e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn exit_code_shows_up_after_the_child_exits() {
        let child = spawn(&["true".to_string()]).unwrap();
        let mut pi = ProcInfo::new(vec!["true".to_string()], true, child);
        let mut code = None;
        for _ in 0..100 {
            code = pi.poll_exit();
            if code.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(code, Some(0));
        // cached after reaping
        assert_eq!(pi.poll_exit(), Some(0));
    }

    #[tokio::test]
    async fn failing_child_reports_its_code() {
        let child = spawn(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()]).unwrap();
        let mut pi = ProcInfo::new(vec!["sh".to_string()], true, child);
        let mut code = None;
        for _ in 0..100 {
            code = pi.poll_exit();
            if code.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn run_shell_reports_exit_codes() {
        assert_eq!(run_shell("true").await, 0);
        assert_eq!(run_shell("exit 7").await, 7);
    }
}
