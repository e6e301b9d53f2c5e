//! PEX-INFO metadata
//!
//! The JSON document at the root of every built PEX describing how it boots.

use crate::error::{PexError, PexResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// File name of the metadata document inside a PEX
pub const PEX_INFO_PATH: &str = "PEX-INFO";

/// Where a venv's `bin` directory goes on `PATH` when the venv runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinPath {
    #[default]
    False,
    Prepend,
    Append,
}

impl BinPath {
    /// Parse a `--venv` value
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "false" => Ok(Self::False),
            "prepend" => Ok(Self::Prepend),
            "append" => Ok(Self::Append),
            other => Err(format!("invalid venv bin path '{}': expected prepend or append", other)),
        }
    }
}

impl fmt::Display for BinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::False => write!(f, "false"),
            Self::Prepend => write!(f, "prepend"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// How much of the ambient `sys.path` a running PEX may see
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritPath {
    #[default]
    False,
    Fallback,
    Prefer,
}

impl InheritPath {
    /// Parse an `--inherit-path` value
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "false" => Ok(Self::False),
            "fallback" => Ok(Self::Fallback),
            "prefer" => Ok(Self::Prefer),
            other => Err(format!(
                "invalid inherit path '{}': expected false, fallback or prefer",
                other
            )),
        }
    }
}

/// One distribution packaged under `.deps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub project_name: String,
    pub version: String,
    pub fingerprint: String,
    /// Runtime targets this distribution serves, e.g. `cp311`
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProperties {
    pub pex_version: String,
}

impl Default for BuildProperties {
    fn default() -> Self {
        Self {
            pex_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PexInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub interpreter_constraints: Vec<String>,
    /// Direct requirements only
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Keyed by `.deps` directory name
    #[serde(default)]
    pub distributions: BTreeMap<String, DistributionInfo>,
    #[serde(default)]
    pub venv: bool,
    #[serde(default)]
    pub venv_bin_path: BinPath,
    #[serde(default)]
    pub venv_copies: bool,
    #[serde(default)]
    pub includes_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pex_path: Option<String>,
    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default = "default_true")]
    pub emit_warnings: bool,
    #[serde(default)]
    pub inherit_path: InheritPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pex_root: Option<String>,
    #[serde(default = "default_true")]
    pub strip_pex_env: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pex_hash: Option<String>,
    #[serde(default)]
    pub build_properties: BuildProperties,
}

impl Default for PexInfo {
    fn default() -> Self {
        Self {
            entry_point: None,
            script: None,
            interpreter_constraints: Vec::new(),
            requirements: Vec::new(),
            distributions: BTreeMap::new(),
            venv: false,
            venv_bin_path: BinPath::False,
            venv_copies: false,
            includes_tools: false,
            pex_path: None,
            ignore_errors: false,
            emit_warnings: true,
            inherit_path: InheritPath::False,
            pex_root: None,
            strip_pex_env: true,
            code_hash: None,
            pex_hash: None,
            build_properties: BuildProperties::default(),
        }
    }
}

impl PexInfo {
    /// Load `PEX-INFO` from a loose PEX directory.
    pub fn load(pex_dir: &Path) -> PexResult<Self> {
        let path = pex_dir.join(PEX_INFO_PATH);
        let content = fs::read(&path).map_err(|e| PexError::InvalidPex {
            path: pex_dir.to_path_buf(),
            reason: format!("cannot read {}: {}", PEX_INFO_PATH, e),
        })?;
        serde_json::from_slice(&content).map_err(|e| PexError::InvalidPex {
            path: pex_dir.to_path_buf(),
            reason: format!("malformed {}: {}", PEX_INFO_PATH, e),
        })
    }

    /// Serialize deterministically.
    pub fn dump(&self) -> PexResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `PEX-INFO` into `dir`.
    pub fn write(&self, dir: &Path) -> PexResult<()> {
        let path = dir.join(PEX_INFO_PATH);
        fs::write(&path, self.dump()?)
            .map_err(|e| PexError::io(format!("writing {}", path.display()), e))
    }
}
