//! Interpreter descriptors produced by probing

use crate::platform::Platform;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Python implementation family
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Implementation {
    CPython,
    PyPy,
    Other(String),
}

impl Implementation {
    /// Parse an implementation name as reported by `platform.python_implementation()`
    /// or written in a constraint.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "cpython" | "cp" => Self::CPython,
            "pypy" | "pp" => Self::PyPy,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Wheel-tag abbreviation, e.g. `cp`
    pub fn abbreviation(&self) -> String {
        match self {
            Self::CPython => "cp".to_string(),
            Self::PyPy => "pp".to_string(),
            Self::Other(name) => name.to_ascii_lowercase().chars().take(2).collect(),
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CPython => write!(f, "CPython"),
            Self::PyPy => write!(f, "PyPy"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// An identified interpreter. Immutable once probed.
///
/// Identity is the binary path: two descriptors for the same binary are
/// equal regardless of how they were discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpreter {
    binary: PathBuf,
    version: Version,
    implementation: Implementation,
    supported_platforms: Vec<Platform>,
}

impl Interpreter {
    pub fn new(
        binary: PathBuf,
        implementation: Implementation,
        version: Version,
        supported_platforms: Vec<Platform>,
    ) -> Self {
        let mut unique = Vec::with_capacity(supported_platforms.len());
        for platform in supported_platforms {
            if !unique.contains(&platform) {
                unique.push(platform);
            }
        }
        Self {
            binary,
            version,
            implementation,
            supported_platforms: unique,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    /// Platform tags this interpreter can install distributions for, most
    /// specific first.
    pub fn supported_platforms(&self) -> &[Platform] {
        &self.supported_platforms
    }

    /// The most specific platform of this interpreter, if it reported any.
    pub fn platform(&self) -> Option<&Platform> {
        self.supported_platforms.first()
    }

    /// Runtime target tag, e.g. `cp311`
    pub fn target_tag(&self) -> String {
        format!(
            "{}{}{}",
            self.implementation.abbreviation(),
            self.version.major,
            self.version.minor
        )
    }

    /// Whether this interpreter can serve the given platform tag.
    pub fn supports(&self, platform: &Platform) -> bool {
        self.supported_platforms.contains(platform)
    }
}

impl PartialEq for Interpreter {
    fn eq(&self, other: &Self) -> bool {
        self.binary == other.binary
    }
}

impl Eq for Interpreter {}

impl Hash for Interpreter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.binary.hash(state);
    }
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} ({})",
            self.implementation,
            self.version,
            self.binary.display()
        )
    }
}
