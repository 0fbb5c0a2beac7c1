/*
 * state.rs
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

//! Persisted agent identity.
//!
//! One small JSON file under the user's local app-data directory. A missing
//! or malformed file means a fresh identity; any other read failure is fatal
//! at startup. Every start increments the session counter and rewrites the
//! file, so the UUID is stable for the life of the image.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATE_FILE_NAME: &str = "remote_test_agent.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_uuid: String,
    pub session_count: u64,
}

impl AgentState {
    fn fresh() -> Self {
        Self {
            agent_uuid: Uuid::new_v4().to_string(),
            session_count: 0,
        }
    }
}

/// The conventional state-file location for this user.
pub fn default_state_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(STATE_FILE_NAME))
}

/// Load (or mint) the identity, count this session, write it back.
pub fn open_session(path: &Path) -> io::Result<AgentState> {
    let mut state = match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<AgentState>(&bytes) {
            Ok(state) => state,
            Err(_) => AgentState::fresh(),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => AgentState::fresh(),
        Err(e) => return Err(e),
    };
    state.session_count += 1;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec(&state)?)?;
    Ok(state)
}
