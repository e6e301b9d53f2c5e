//! Interpreter probing
//!
//! Identifies an interpreter binary by running it with a small script that
//! reports its implementation, version and supported platform tags as JSON.

use crate::error::{PexError, PexResult};
use crate::interpreter::descriptor::{Implementation, Interpreter};
use crate::platform::Platform;
use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Names tried, in order, for the default interpreter
const DEFAULT_INTERPRETER_NAMES: &[&str] = &["python3", "python"];

const IDENTIFY_SCRIPT: &str = r#"
import json, sys, sysconfig
import platform as _platform

impl = _platform.python_implementation()
abbr = {"CPython": "cp", "PyPy": "pp"}.get(impl, impl.lower()[:2])
version = "%d%d" % sys.version_info[:2]
platforms = []
try:
    from packaging import tags
    for tag in tags.sys_tags():
        rest = tag.interpreter[len(abbr):]
        if tag.interpreter.startswith(abbr) and rest.isdigit():
            platforms.append("-".join((tag.platform, abbr, rest, tag.abi)))
except Exception:
    pass
if not platforms:
    plat = sysconfig.get_platform().replace("-", "_").replace(".", "_")
    abi = abbr + version + getattr(sys, "abiflags", "")
    platforms.append("-".join((plat, abbr, version, abi)))
print(json.dumps({
    "binary": sys.executable,
    "implementation": impl,
    "version": list(sys.version_info[:3]),
    "platforms": platforms,
}))
"#;

/// Identifies interpreters
///
/// The subprocess implementation is used in production; tests substitute
/// fakes to exercise selection without real interpreters.
#[async_trait]
pub trait InterpreterProbe: Send + Sync {
    /// Identify the interpreter at `binary`.
    async fn from_binary(&self, binary: &Path) -> PexResult<Interpreter>;

    /// Look `name` up on `PATH` and identify it. `None` when not found.
    async fn from_env(&self, name: &str) -> PexResult<Option<Interpreter>> {
        match which::which(name) {
            Ok(path) => self.from_binary(&path).await.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// The default interpreter: the first of `python3`, `python` on `PATH`.
    async fn current(&self) -> PexResult<Interpreter> {
        for name in DEFAULT_INTERPRETER_NAMES {
            if let Some(interpreter) = self.from_env(name).await? {
                return Ok(interpreter);
            }
        }
        Err(PexError::InterpreterNotFound(
            DEFAULT_INTERPRETER_NAMES.join(" or "),
        ))
    }
}

/// JSON report printed by the identification script
#[derive(Debug, Deserialize)]
struct IdentityReport {
    #[serde(default)]
    binary: Option<PathBuf>,
    implementation: String,
    version: (u64, u64, u64),
    #[serde(default)]
    platforms: Vec<String>,
}

impl IdentityReport {
    fn into_interpreter(self, probed: &Path) -> Interpreter {
        let binary = self
            .binary
            .filter(|b| !b.as_os_str().is_empty())
            .unwrap_or_else(|| probed.to_path_buf());
        let platforms = self
            .platforms
            .iter()
            .filter_map(|raw| match raw.parse::<Platform>() {
                Ok(platform) => Some(platform),
                Err(e) => {
                    trace!("Ignoring unparseable platform {}: {}", raw, e);
                    None
                }
            })
            .collect();
        let (major, minor, micro) = self.version;
        Interpreter::new(
            binary,
            Implementation::from_name(&self.implementation),
            Version::new(major, minor, micro),
            platforms,
        )
    }
}

/// Probe that spawns each interpreter
#[derive(Debug, Default, Clone)]
pub struct SubprocessProbe;

impl SubprocessProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InterpreterProbe for SubprocessProbe {
    async fn from_binary(&self, binary: &Path) -> PexResult<Interpreter> {
        debug!("Identifying interpreter {}", binary.display());

        let output = Command::new(binary)
            .args(["-s", "-E", "-c", IDENTIFY_SCRIPT])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PexError::ProbeFailed {
                binary: binary.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PexError::ProbeFailed {
                binary: binary.to_path_buf(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        parse_identity(binary, &output.stdout)
    }
}

fn parse_identity(binary: &Path, stdout: &[u8]) -> PexResult<Interpreter> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    let report: IdentityReport =
        serde_json::from_str(line.trim()).map_err(|e| PexError::ProbeFailed {
            binary: binary.to_path_buf(),
            reason: format!("unexpected identification output: {}", e),
        })?;
    Ok(report.into_interpreter(binary))
}
