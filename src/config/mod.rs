//! Environment configuration for pex
//!
//! Variables come from rc files (`KEY=VALUE` lines) overlaid with the process
//! environment. They are read once at startup; everything below the CLI
//! layer receives plain values instead of reading the environment itself.

use crate::error::{PexError, PexResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// System-wide rc file
pub const SYSTEM_RC: &str = "/etc/pexrc";

/// Per-user rc file, relative to the home directory
pub const USER_RC: &str = ".pexrc";

/// The variables pex reads, with their documentation
pub const VARIABLES: &[(&str, &str)] = &[
    ("PEX_ROOT", "The directory pex uses for its caches. Default: ~/.pex"),
    ("PEX_VERBOSE", "Log verbosity, 0 to 3. The larger of this and -v wins."),
    ("PEX_PYTHON_PATH", "Interpreter search path used when --python-path is not given."),
    ("PEX_IGNORE_RCFILES", "Skip /etc/pexrc and ~/.pexrc when truthy."),
    ("TMPDIR", "Default for --tmpdir."),
];

/// Merged rc file and environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    /// Build from rc file contents, in increasing precedence, then the
    /// environment on top.
    pub fn from_sources<I, K, V>(rc_contents: &[String], env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = BTreeMap::new();
        for content in rc_contents {
            values.extend(parse_rc(content));
        }
        values.extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { values }
    }

    /// Load rc files and the process environment.
    ///
    /// `/etc/pexrc` and `~/.pexrc` are skipped when `PEX_IGNORE_RCFILES` is
    /// truthy; an explicit `rcfile` is always read.
    pub async fn load(rcfile: Option<&Path>) -> PexResult<Self> {
        let env: Vec<(String, String)> = std::env::vars().collect();
        let ignore_rcfiles = env
            .iter()
            .find(|(k, _)| k == "PEX_IGNORE_RCFILES")
            .is_some_and(|(_, v)| is_truthy(v));

        let mut paths: Vec<PathBuf> = Vec::new();
        if !ignore_rcfiles {
            paths.push(PathBuf::from(SYSTEM_RC));
            if let Some(home) = dirs::home_dir() {
                paths.push(home.join(USER_RC));
            }
        }
        if let Some(rcfile) = rcfile {
            paths.push(rcfile.to_path_buf());
        }

        let mut contents = Vec::new();
        for path in &paths {
            match fs::read_to_string(path).await {
                Ok(content) => {
                    debug!("Loaded rc file {}", path.display());
                    contents.push(content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No rc file at {}", path.display());
                }
                Err(e) => {
                    return Err(PexError::io(format!("reading rc file {}", path.display()), e))
                }
            }
        }
        Ok(Self::from_sources(&contents, env))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `PEX_ROOT` when set
    pub fn pex_root_override(&self) -> Option<PathBuf> {
        self.get("PEX_ROOT").map(crate::seed::expand_user)
    }

    /// The shared cache root
    pub fn pex_root(&self) -> PathBuf {
        self.pex_root_override().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pex")
        })
    }

    /// `PEX_VERBOSE`, 0 when unset or malformed
    pub fn verbosity(&self) -> u8 {
        self.get("PEX_VERBOSE")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn python_path(&self) -> Option<&str> {
        self.get("PEX_PYTHON_PATH")
    }

    /// `PATH`, the default interpreter search path
    pub fn path(&self) -> Option<&str> {
        self.get("PATH")
    }

    /// Default temporary directory
    pub fn tmpdir(&self) -> PathBuf {
        self.get("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// `--help-variables` output: each variable followed by its indented help
pub fn render_variables_help() -> String {
    VARIABLES
        .iter()
        .map(|(name, help)| format!("\n{}\n    {}\n", name, help))
        .collect()
}

/// Parse `KEY=VALUE` lines, ignoring blanks and `#` comments.
pub fn parse_rc(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// `1`, `true`, `yes` or `on`, case-insensitively
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
