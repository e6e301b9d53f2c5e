//! Interpreter discovery on a search path

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// An ordered interpreter search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    entries: Vec<PathBuf>,
    description: String,
}

impl SearchPath {
    /// Parse a colon (or platform separator) delimited search path.
    pub fn parse(raw: &str) -> Self {
        Self {
            entries: std::env::split_paths(raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            description: raw.to_string(),
        }
    }

    /// Search path from an explicit value, falling back to the given `PATH` value.
    pub fn from_config(python_path: Option<&str>, path_env: Option<&str>) -> Self {
        match python_path {
            Some(raw) => Self::parse(raw),
            None => {
                let mut path = Self::parse(path_env.unwrap_or_default());
                path.description = "$PATH".to_string();
                path
            }
        }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Human readable form for error messages
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Whether a file name looks like a Python interpreter binary:
/// `python`, `python3`, `python3.11`, `pypy`, `pypy3.10` and so on.
pub fn is_interpreter_name(name: &str) -> bool {
    let version = match name
        .strip_prefix("python")
        .or_else(|| name.strip_prefix("pypy"))
    {
        Some(rest) => rest,
        None => return false,
    };
    if version.is_empty() {
        return true;
    }
    version
        .split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Enumerate candidate interpreter binaries in search path order.
///
/// Each entry may be an interpreter binary or a directory of binaries.
/// Directory contents are visited in name order. Candidates that resolve
/// to an already seen binary are dropped.
pub fn find_candidates(search_path: &SearchPath) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let mut push = |path: PathBuf| {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if seen.insert(key) {
            candidates.push(path);
        }
    };

    for entry in search_path.entries() {
        if entry.is_file() {
            push(entry.clone());
            continue;
        }
        let Ok(read_dir) = fs::read_dir(entry) else {
            trace!("Skipping unreadable search path entry {}", entry.display());
            continue;
        };
        let mut names: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_interpreter_name)
            })
            .filter(|p| is_executable(p))
            .collect();
        names.sort();
        for path in names {
            push(path);
        }
    }

    candidates
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
