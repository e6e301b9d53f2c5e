//! Platform tags
//!
//! A platform tag names an OS/arch, implementation, version and ABI
//! combination in wheel-tag form: `<platform>-<impl>-<version>-<abi>`,
//! e.g. `linux_x86_64-cp-311-cp311`. The sentinel `current` stands for
//! whatever the current interpreter supports.

mod matcher;

pub use matcher::{match_local_platforms, match_platforms, PlatformMatch};

use crate::error::{PexError, PexResult};
use std::fmt;
use std::str::FromStr;

/// A structured wheel-style platform tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    /// OS and architecture, e.g. `linux_x86_64` or `macosx_11_0_arm64`
    pub platform: String,
    /// Implementation abbreviation, e.g. `cp` or `pp`
    pub implementation: String,
    /// Version without separators, e.g. `311`
    pub version: String,
    /// ABI tag, e.g. `cp311`
    pub abi: String,
}

impl Platform {
    /// Build a normalized platform from its four components.
    pub fn new(platform: &str, implementation: &str, version: &str, abi: &str) -> PexResult<Self> {
        let raw = format!("{platform}-{implementation}-{version}-{abi}");
        let invalid = |reason: &str| PexError::InvalidPlatform {
            platform: raw.clone(),
            reason: reason.to_string(),
        };

        if platform.is_empty() || implementation.is_empty() || version.is_empty() || abi.is_empty()
        {
            return Err(invalid(
                "expected four non-empty fields: <platform>-<impl>-<version>-<abi>",
            ));
        }
        let version = version.replace('.', "");
        if !version.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("the version field must be numeric, e.g. 311 or 3.11"));
        }

        Ok(Self {
            platform: platform.to_lowercase().replace(['-', '.'], "_"),
            implementation: implementation.to_lowercase(),
            version,
            abi: abi.to_lowercase().replace(['-', '.'], "_"),
        })
    }

    /// The runtime target tag this platform resolves for, e.g. `cp311`.
    pub fn target_tag(&self) -> String {
        format!("{}{}", self.implementation, self.version)
    }

    /// The version in dotted form for `pip --python-version`, e.g. `3.11`.
    pub fn dotted_version(&self) -> String {
        let mut chars = self.version.chars();
        match chars.next() {
            Some(major) => {
                let rest: String = chars.collect();
                if rest.is_empty() {
                    major.to_string()
                } else {
                    format!("{major}.{rest}")
                }
            }
            None => String::new(),
        }
    }
}

impl FromStr for Platform {
    type Err = PexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The platform component itself may contain dashes, so split from the right.
        let mut parts = s.rsplitn(4, '-');
        let abi = parts.next().unwrap_or_default();
        let version = parts.next().unwrap_or_default();
        let implementation = parts.next().unwrap_or_default();
        let platform = parts.next().unwrap_or_default();
        Self::new(platform, implementation, version, abi).map_err(|e| match e {
            PexError::InvalidPlatform { reason, .. } => PexError::InvalidPlatform {
                platform: s.to_string(),
                reason,
            },
            other => other,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.platform, self.implementation, self.version, self.abi
        )
    }
}

/// A declared `--platform` value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformTarget {
    /// The platform of the current interpreter
    Current,
    /// An explicit platform tag
    Tag(Platform),
}

impl PlatformTarget {
    /// Parse a `--platform` argument; used as the clap value parser.
    pub fn parse(s: &str) -> Result<Self, String> {
        s.parse().map_err(|e: PexError| e.to_string())
    }
}

impl FromStr for PlatformTarget {
    type Err = PexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("current") {
            return Ok(Self::Current);
        }
        s.parse().map(Self::Tag)
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Tag(platform) => platform.fmt(f),
        }
    }
}
