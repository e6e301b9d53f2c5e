//! Installed distributions
//!
//! Reads the `*.dist-info` metadata pip leaves behind: `RECORD` for the file
//! list and fingerprint, `METADATA` for name, version and `Requires-Dist`.

use crate::error::{PexError, PexResult};
use crate::resolve::requirement::{canonicalize_name, Requirement};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// An installed distribution ready to be copied into a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub project_name: String,
    pub version: String,
    /// Directory the files are relative to
    pub location: PathBuf,
    /// Files belonging to this distribution, relative to `location`
    pub files: Vec<PathBuf>,
    /// Content fingerprint of the installed files
    pub fingerprint: String,
    /// Runtime target this distribution was resolved for, e.g. `cp311`
    pub target_tag: String,
}

impl Distribution {
    /// Directory name under `.deps`
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.project_name, self.version, self.fingerprint)
    }
}

/// Parsed `METADATA` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub requires_dist: Vec<Requirement>,
}

/// Locate the `.dist-info` directory for a project under `site_dir`.
pub fn find_dist_info(site_dir: &Path, project_name: &str, version: &str) -> PexResult<PathBuf> {
    let wanted = canonicalize_name(project_name);
    let entries = fs::read_dir(site_dir)
        .map_err(|e| PexError::io(format!("listing {}", site_dir.display()), e))?;

    for entry in entries.filter_map(Result::ok) {
        let file_name = entry.file_name();
        let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".dist-info")) else {
            continue;
        };
        let Some((name, dist_version)) = stem.rsplit_once('-') else {
            continue;
        };
        if canonicalize_name(name) == wanted && dist_version == version {
            return Ok(entry.path());
        }
    }

    Err(PexError::InvalidDistribution {
        path: site_dir.to_path_buf(),
        reason: format!("no .dist-info found for {} {}", project_name, version),
    })
}

/// Load a distribution installed into `site_dir` from its `RECORD`.
pub fn load_installed(
    site_dir: &Path,
    project_name: &str,
    version: &str,
    target_tag: &str,
) -> PexResult<Distribution> {
    let dist_info = find_dist_info(site_dir, project_name, version)?;
    let record_path = dist_info.join("RECORD");
    let record = fs::read(&record_path)
        .map_err(|e| PexError::io(format!("reading {}", record_path.display()), e))?;

    let files = parse_record(&String::from_utf8_lossy(&record))
        .into_iter()
        .filter(|f| site_dir.join(f).is_file())
        .collect();

    Ok(Distribution {
        project_name: canonicalize_name(project_name),
        version: version.to_string(),
        location: site_dir.to_path_buf(),
        files,
        fingerprint: fingerprint(&record),
        target_tag: target_tag.to_string(),
    })
}

/// File paths listed in a `RECORD`, skipping entries outside the install
/// root and cached bytecode.
pub fn parse_record(record: &str) -> Vec<PathBuf> {
    record
        .lines()
        .filter_map(record_path)
        .map(PathBuf::from)
        .filter(|p| {
            p.components().all(|c| matches!(c, Component::Normal(_)))
                && !p.components().any(|c| c.as_os_str() == "__pycache__")
        })
        .collect()
}

fn record_path(line: &str) -> Option<String> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    if let Some(quoted) = line.strip_prefix('"') {
        let end = quoted.find("\",")?;
        return Some(quoted[..end].replace("\"\"", "\""));
    }
    line.split(',').next().map(str::to_string)
}

/// Parse the RFC 822 style headers of a `METADATA` file.
pub fn parse_metadata(content: &str) -> Option<Metadata> {
    let mut name = None;
    let mut version = None;
    let mut requires_dist = Vec::new();

    for line in content.lines() {
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => name = Some(value.to_string()),
            "Version" => version = Some(value.to_string()),
            "Requires-Dist" => {
                if let Ok(requirement) = Requirement::parse(value) {
                    requires_dist.push(requirement);
                }
            }
            _ => {}
        }
    }

    Some(Metadata {
        name: name?,
        version: version?,
        requires_dist,
    })
}

/// Read `METADATA` from the single `.dist-info` directory under `dir`.
pub fn read_metadata(dir: &Path) -> PexResult<Metadata> {
    let invalid = |reason: &str| PexError::InvalidDistribution {
        path: dir.to_path_buf(),
        reason: reason.to_string(),
    };
    let entries =
        fs::read_dir(dir).map_err(|e| PexError::io(format!("listing {}", dir.display()), e))?;
    let dist_info = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "dist-info"))
        .ok_or_else(|| invalid("no .dist-info directory"))?;

    dist_info_metadata(&dist_info)
}

/// Read `METADATA` for one project installed into a shared `site_dir`.
pub fn read_installed_metadata(site_dir: &Path, project_name: &str, version: &str) -> PexResult<Metadata> {
    dist_info_metadata(&find_dist_info(site_dir, project_name, version)?)
}

fn dist_info_metadata(dist_info: &Path) -> PexResult<Metadata> {
    let metadata_path = dist_info.join("METADATA");
    let content = fs::read_to_string(&metadata_path)
        .map_err(|e| PexError::io(format!("reading {}", metadata_path.display()), e))?;
    parse_metadata(&content).ok_or_else(|| PexError::InvalidDistribution {
        path: dist_info.to_path_buf(),
        reason: "METADATA lacks Name or Version".to_string(),
    })
}

/// Hex SHA-256 of the given bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RECORD: &str = "\
six.py,sha256=abc,34549
six-1.16.0.dist-info/METADATA,sha256=def,1795
six-1.16.0.dist-info/RECORD,,
__pycache__/six.cpython-311.pyc,,
../../bin/tool,sha256=ghi,200
\"odd,name.py\",sha256=jkl,10
";

    #[test]
    fn record_paths() {
        let files = parse_record(RECORD);
        assert_eq!(
            files,
            vec![
                PathBuf::from("six.py"),
                PathBuf::from("six-1.16.0.dist-info/METADATA"),
                PathBuf::from("six-1.16.0.dist-info/RECORD"),
                PathBuf::from("odd,name.py"),
            ]
        );
    }

    #[test]
    fn metadata_headers() {
        let metadata = parse_metadata(
            "Metadata-Version: 2.1\nName: requests\nVersion: 2.31.0\nRequires-Dist: idna<4,>=2.5\n\
             Requires-Dist: PySocks!=1.5.7,>=1.5.6; extra == \"socks\"\n\nRequires-Dist: ignored\n",
        )
        .unwrap();
        assert_eq!(metadata.name, "requests");
        assert_eq!(metadata.version, "2.31.0");
        assert_eq!(metadata.requires_dist.len(), 2);
        assert_eq!(metadata.requires_dist[1].marker(), Some("extra == \"socks\""));
        assert!(parse_metadata("Name: x\n").is_none());
    }

    #[test]
    fn loads_installed_distribution() {
        let site = TempDir::new().unwrap();
        let dist_info = site.path().join("six-1.16.0.dist-info");
        fs::create_dir(&dist_info).unwrap();
        fs::write(site.path().join("six.py"), "# six").unwrap();
        fs::write(dist_info.join("METADATA"), "Name: six\nVersion: 1.16.0\n").unwrap();
        fs::write(dist_info.join("RECORD"), RECORD).unwrap();

        let dist = load_installed(site.path(), "Six", "1.16.0", "cp311").unwrap();
        assert_eq!(dist.project_name, "six");
        assert_eq!(
            dist.files,
            vec![
                PathBuf::from("six.py"),
                PathBuf::from("six-1.16.0.dist-info/METADATA"),
                PathBuf::from("six-1.16.0.dist-info/RECORD"),
            ]
        );
        assert_eq!(dist.fingerprint, fingerprint(RECORD.as_bytes()));
        assert!(dist.key().starts_with("six-1.16.0-"));

        assert!(load_installed(site.path(), "six", "2.0.0", "cp311").is_err());
    }
}
