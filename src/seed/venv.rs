//! Materialising a PEX as a virtual environment in the shared cache

use crate::build::{PexInfo, DEPS_DIR, MAIN, PEX_INFO_PATH};
use crate::error::{PexError, PexResult};
use crate::fsutil::{commit_staged, copy_file, copy_tree, set_executable, staging_sibling, walk_files};
use crate::interpreter::Interpreter;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Cache subdirectory holding venvs, keyed by `pex_hash` then interpreter
pub const VENVS_DIR: &str = "venvs";

/// Name of the launcher script at the venv root
pub const VENV_LAUNCHER: &str = "pex";

const LAUNCHER: &str = include_str!("venv_launcher.py");

#[cfg(windows)]
const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const BIN_DIR: &str = "bin";

/// Stable per-interpreter directory name, e.g. `cp311-1f0c2a9b3e4d`
pub fn interpreter_key(interpreter: &Interpreter) -> String {
    let digest = Sha256::digest(interpreter.binary().to_string_lossy().as_bytes());
    format!("{}-{}", interpreter.target_tag(), &hex::encode(digest)[..12])
}

/// Where the venv for `pex_hash` and `interpreter` lives
pub fn venv_dir(pex_root: &Path, pex_hash: &str, interpreter: &Interpreter) -> PathBuf {
    pex_root
        .join(VENVS_DIR)
        .join(pex_hash)
        .join(interpreter_key(interpreter))
}

/// Create the venv for `pex` unless it already exists. Returns the path of
/// its launcher.
pub async fn ensure_venv(
    pex: &Path,
    info: &PexInfo,
    pex_root: &Path,
    interpreter: &Interpreter,
) -> PexResult<PathBuf> {
    let pex_hash = info.pex_hash.as_deref().ok_or_else(|| {
        PexError::Internal(format!(
            "There was no pex_hash stored in {} for {}.",
            PEX_INFO_PATH,
            pex.display()
        ))
    })?;
    let dest = venv_dir(pex_root, pex_hash, interpreter);
    let launcher = dest.join(VENV_LAUNCHER);
    if dest.exists() {
        debug!("Using cached venv {}", dest.display());
        return Ok(launcher);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PexError::io(format!("creating {}", parent.display()), e))?;
    }
    let staging = staging_sibling(&dest);
    if let Err(e) = populate(pex, info, interpreter, &staging, &dest).await {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    if commit_staged(&staging, &dest)? {
        info!("Created venv {} from {}", dest.display(), pex.display());
    }
    Ok(launcher)
}

async fn populate(
    pex: &Path,
    info: &PexInfo,
    interpreter: &Interpreter,
    staging: &Path,
    dest: &Path,
) -> PexResult<()> {
    let mut command = Command::new(interpreter.binary());
    command.args(["-m", "venv", "--without-pip"]);
    if info.venv_copies {
        command.arg("--copies");
    }
    let description = format!("{} -m venv {}", interpreter.binary().display(), staging.display());
    let output = command
        .arg(staging)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PexError::command_failed(description.clone(), e))?;
    if !output.status.success() {
        return Err(PexError::command_exec(
            description,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let site_packages = find_site_packages(staging)?;
    install_contents(pex, info, &interpreter.target_tag(), &site_packages)?;
    info.write(staging)?;

    let python = dest.join(BIN_DIR).join("python");
    let launcher = staging.join(VENV_LAUNCHER);
    fs::write(&launcher, render_launcher(&python))
        .map_err(|e| PexError::io(format!("writing {}", launcher.display()), e))?;
    set_executable(&launcher)
}

/// Launcher source for a venv whose interpreter will live at `python`
fn render_launcher(python: &Path) -> String {
    format!("#!{} -sE\n{}", python.display(), LAUNCHER)
}

/// Copy user code and the distributions serving `target_tag` into
/// `site_packages`.
fn install_contents(pex: &Path, info: &PexInfo, target_tag: &str, site_packages: &Path) -> PexResult<()> {
    for (relative, path) in walk_files(pex)? {
        if relative.starts_with(DEPS_DIR)
            || relative == Path::new(MAIN)
            || relative == Path::new(PEX_INFO_PATH)
        {
            continue;
        }
        copy_file(&path, &site_packages.join(relative))?;
    }

    for (key, distribution) in &info.distributions {
        if !distribution.targets.is_empty() && !distribution.targets.iter().any(|t| t == target_tag) {
            debug!("Skipping {} for {}", key, target_tag);
            continue;
        }
        copy_tree(&pex.join(DEPS_DIR).join(key), site_packages)?;
    }
    Ok(())
}

/// The `site-packages` directory of a freshly created venv
fn find_site_packages(venv: &Path) -> PexResult<PathBuf> {
    let windows = venv.join("Lib").join("site-packages");
    if windows.is_dir() {
        return Ok(windows);
    }

    let lib = venv.join("lib");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&lib)
        .map_err(|e| PexError::io(format!("listing {}", lib.display()), e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path().join("site-packages"))
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        PexError::Internal(format!("no site-packages directory in venv {}", venv.display()))
    })
}
