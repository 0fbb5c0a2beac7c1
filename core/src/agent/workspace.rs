/*
 * workspace.rs
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

//! Workspace path handling.
//!
//! Names arrive from the wire (tar entries, `/files/` suffixes) and must
//! stay inside the workspace: no absolute paths, no `..`.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Reduce a wire name to a relative path confined to the workspace.
/// `None` for anything absolute, escaping, or empty.
pub fn confine(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Relative names of all regular files under `root`, in filesystem
/// enumeration order (stable: sorted by file name per directory). A missing
/// root is an empty workspace, not an error.
pub fn enum_files(root: &Path) -> io::Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        match rel.to_str() {
            Some(name) => names.push(name.to_string()),
            None => warn!("skipping non-UTF-8 file name: {}", rel.display()),
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_relative_names_pass() {
        assert_eq!(confine("a.txt"), Some(PathBuf::from("a.txt")));
        assert_eq!(confine("b/c"), Some(PathBuf::from("b/c")));
        assert_eq!(confine("./b/c"), Some(PathBuf::from("b/c")));
    }

    #[test]
    fn escaping_names_are_rejected() {
        assert_eq!(confine("../x"), None);
        assert_eq!(confine("a/../../x"), None);
        assert_eq!(confine("/etc/passwd"), None);
        assert_eq!(confine(""), None);
        assert_eq!(confine("."), None);
    }

    #[test]
    fn enumeration_lists_files_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b").join("c"), b"yo").unwrap();

        let names = enum_files(dir.path()).unwrap();
        assert_eq!(names, ["a.txt", "b/c"]);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(enum_files(&gone).unwrap().is_empty());
    }
}
