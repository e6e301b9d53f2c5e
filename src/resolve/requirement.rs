//! Requirement string handling
//!
//! Project name, extras, PEP 440 version specifiers and the raw environment
//! marker. Markers are evaluated by [`crate::resolve::marker`].

use crate::error::{PexError, PexResult};
use pep440_rs::{Version, VersionSpecifiers};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// A parsed requirement like `requests[socks]>=2.25; python_version>"3"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    raw: String,
    name: String,
    extras: Vec<String>,
    specifier: String,
    marker: Option<String>,
}

impl Requirement {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let text = raw.trim();
        let (body, marker) = match text.split_once(';') {
            Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
            None => (text, None),
        };

        let name_end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty() {
            return Err(format!("invalid requirement '{}': missing project name", raw));
        }

        let mut rest = body[name_end..].trim_start();
        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let (inner, tail) = after
                .split_once(']')
                .ok_or_else(|| format!("invalid requirement '{}': unclosed extras", raw))?;
            extras = inner
                .split(',')
                .map(|e| canonicalize_name(e.trim()))
                .filter(|e| !e.is_empty())
                .collect();
            rest = tail.trim_start();
        }

        // Direct references (`name @ url`) carry no version specifiers.
        let specifier = if rest.starts_with('@') {
            String::new()
        } else {
            rest.trim_start_matches('(')
                .trim_end_matches(')')
                .replace(' ', "")
        };
        if !specifier.is_empty() {
            VersionSpecifiers::from_str(&specifier)
                .map_err(|e| format!("invalid requirement '{}': {}", raw, e))?;
        }

        Ok(Self {
            raw: text.to_string(),
            name: canonicalize_name(name),
            extras,
            specifier,
            marker,
        })
    }

    /// Canonical project name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Whether `version` satisfies every version specifier. A requirement
    /// without specifiers accepts any version.
    pub fn contains_version(&self, version: &str) -> Result<bool, String> {
        if self.specifier.is_empty() {
            return Ok(true);
        }
        let specifiers = VersionSpecifiers::from_str(&self.specifier)
            .map_err(|e| format!("invalid specifiers in '{}': {}", self.raw, e))?;
        let parsed = Version::from_str(version)
            .map_err(|e| format!("invalid version '{}': {}", version, e))?;
        Ok(specifiers.contains(&parsed))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// PEP 503 name normalization
pub fn canonicalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Read requirement lines from a requirements file. Comments, blank lines
/// and option lines are skipped; nested `-r` files are followed.
pub fn read_requirement_file(path: &Path) -> PexResult<Vec<Requirement>> {
    let content = fs::read_to_string(path)
        .map_err(|e| PexError::io(format!("reading requirements file {}", path.display()), e))?;

    let mut requirements = Vec::new();
    for line in content.lines() {
        let line = match line.split_once(" #") {
            Some((before, _)) => before,
            None => line,
        }
        .trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(nested) = line
            .strip_prefix("-r ")
            .or_else(|| line.strip_prefix("--requirement "))
        {
            let nested = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(nested.trim());
            requirements.extend(read_requirement_file(&nested)?);
            continue;
        }
        if line.starts_with('-') {
            continue;
        }
        let requirement = Requirement::parse(line).map_err(|reason| PexError::InvalidDistribution {
            path: path.to_path_buf(),
            reason,
        })?;
        requirements.push(requirement);
    }
    Ok(requirements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_name_extras_and_marker() {
        let req = Requirement::parse("Requests[Socks, security] >= 2.25 ; python_version > '3'").unwrap();
        assert_eq!(req.name(), "requests");
        assert_eq!(req.extras(), &["socks".to_string(), "security".to_string()]);
        assert_eq!(req.marker(), Some("python_version > '3'"));
        assert!(req.contains_version("2.31.0").unwrap());
        assert!(!req.contains_version("2.24.0").unwrap());
    }

    fn contains(requirement: &str, version: &str) -> bool {
        Requirement::parse(requirement)
            .unwrap()
            .contains_version(version)
            .unwrap()
    }

    #[test]
    fn version_specifiers() {
        assert!(contains("six", "1.16.0"));
        assert!(contains("six==1.16.0", "1.16.0"));
        assert!(!contains("six==1.16.0", "1.15.0"));
        assert!(contains("six==1.*", "1.16.0"));
        assert!(!contains("six==1.*", "2.0"));
        assert!(contains("requests>=2.25", "2.31.0"));
        assert!(!contains("requests>=3", "2.31.0"));
        assert!(contains("idna<4", "3.6"));
        assert!(!contains("idna<3", "3.6"));
        assert!(!contains("pysocks!=1.5.7", "1.5.7"));
        assert!(contains("pysocks!=1.5.7,>=1.5.6", "1.7.1"));
        assert!(contains("attrs~=23.1", "23.2.0"));
        assert!(!contains("attrs~=23.1", "24.0.0"));
        assert!(contains("idna (<4,>=2.5)", "3.6"));
    }

    #[test]
    fn direct_references_accept_any_version() {
        let req = Requirement::parse("pkg @ https://example.com/pkg-1.0.tar.gz").unwrap();
        assert_eq!(req.name(), "pkg");
        assert!(req.contains_version("9.9").unwrap());
    }

    #[test]
    fn extra_marker_is_kept() {
        let req = Requirement::parse("PySocks!=1.5.7; extra == \"socks\"").unwrap();
        assert_eq!(req.marker(), Some("extra == \"socks\""));
        assert_eq!(req.name(), "pysocks");
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonicalize_name("Foo.Bar__baz"), "foo-bar-baz");
        assert_eq!(canonicalize_name("zope.interface"), "zope-interface");
    }

    #[test]
    fn rejects_missing_name() {
        assert!(Requirement::parse(">=1.0").is_err());
        assert!(Requirement::parse("foo[bar").is_err());
        assert!(Requirement::parse("foo>=>1").is_err());
    }

    #[test]
    fn reads_requirement_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base.txt"), "six==1.16.0\n").unwrap();
        fs::write(
            dir.path().join("reqs.txt"),
            "# comment\n\n--index-url https://example.com\nrequests>=2 # trailing\n-r base.txt\n",
        )
        .unwrap();
        let reqs = read_requirement_file(&dir.path().join("reqs.txt")).unwrap();
        let names: Vec<_> = reqs.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["requests", "six"]);
    }
}
