//! Cache seeding
//!
//! After a PEX is written, seeding installs it into the shared pex root
//! (or materialises it as a venv there) and reports how to invoke it.
//! Entries are keyed by the PEX's content hash and are never rebuilt once
//! present.

mod install;
mod venv;

pub use install::{install_pex, INSTALLED_PEXES_DIR};
pub use venv::{ensure_venv, interpreter_key, venv_dir, VENVS_DIR, VENV_LAUNCHER};

use crate::build::{PexInfo, MAIN, PEX_INFO_PATH};
use crate::error::{PexError, PexResult};
use crate::interpreter::Interpreter;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info_span, Instrument};

/// What seeding reports on stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedMode {
    /// Do not seed
    #[default]
    None,
    /// The bare invocable path
    Args,
    /// A JSON record of pex root, interpreter and invocable path
    Verbose,
}

impl SeedMode {
    /// Parse a `--seed` value. A bare `--seed` means `args`.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "none" => Ok(Self::None),
            "" | "args" => Ok(Self::Args),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!(
                "invalid seed mode '{}': expected none, args or verbose",
                other
            )),
        }
    }
}

impl fmt::Display for SeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Args => write!(f, "args"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

/// The `--seed=verbose` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedInfo {
    pub pex_root: PathBuf,
    pub python: PathBuf,
    pub pex: PathBuf,
}

/// Seed the shared cache from the loose PEX at `pex` and return what to
/// print for `mode`, or `None` when `mode` is [`SeedMode::None`].
///
/// `default_pex_root` applies unless the PEX records its own runtime pex
/// root.
pub async fn seed_cache(
    pex: &Path,
    default_pex_root: &Path,
    interpreter: &Interpreter,
    mode: SeedMode,
) -> PexResult<Option<String>> {
    if mode == SeedMode::None {
        return Ok(None);
    }
    let span = info_span!("seed", pex = %pex.display());
    let info = PexInfo::load(pex)?;
    let pex_root = info
        .pex_root
        .as_deref()
        .map(expand_user)
        .unwrap_or_else(|| default_pex_root.to_path_buf());

    let invocable = async {
        if info.venv {
            return ensure_venv(pex, &info, &pex_root, interpreter).await;
        }
        let pex_hash = info.pex_hash.as_deref().ok_or_else(|| {
            PexError::Internal(format!(
                "There was no pex_hash stored in {} for {}.",
                PEX_INFO_PATH,
                pex.display()
            ))
        })?;
        Ok(install_pex(pex, &pex_root, pex_hash)?.join(MAIN))
    }
    .instrument(span)
    .await?;

    let report = match mode {
        SeedMode::Verbose => serde_json::to_string(&SeedInfo {
            pex_root,
            python: interpreter.binary().to_path_buf(),
            pex: invocable,
        })?,
        _ => invocable.display().to_string(),
    };
    Ok(Some(report))
}

/// Expand a leading `~` to the home directory.
pub fn expand_user(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}
