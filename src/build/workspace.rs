//! Builder workspace
//!
//! A private staging directory for one build. Sources and distributions are
//! added to it, then it is frozen: `__main__.py` and `PEX-INFO` are written,
//! content hashes are computed and no further mutation is allowed. The
//! directory is removed when the workspace is dropped.

use crate::build::pex_info::{DistributionInfo, PexInfo};
use crate::build::writer::{render_main, DEPS_DIR, MAIN};
use crate::error::{PexError, PexResult};
use crate::fsutil::{copy_tree, hardlink_or_copy, hash_files, walk_files};
use crate::interpreter::Interpreter;
use crate::resolve::Distribution;
use sha2::Digest;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

/// Paths the builder owns at the workspace root
const RESERVED: &[&str] = &[MAIN, crate::build::pex_info::PEX_INFO_PATH, DEPS_DIR];

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    info: PexInfo,
    interpreter: Option<Interpreter>,
    preamble: Option<String>,
    shebang: Option<String>,
    /// Relative source path to the file it was taken from
    sources: HashMap<PathBuf, PathBuf>,
    frozen: bool,
}

impl Workspace {
    /// Create a fresh workspace under `tmpdir`.
    pub fn new(
        tmpdir: &Path,
        interpreter: Option<Interpreter>,
        preamble: Option<String>,
    ) -> PexResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pex-build.")
            .tempdir_in(tmpdir)
            .map_err(|e| PexError::io(format!("creating workspace in {}", tmpdir.display()), e))?;
        debug!("Created workspace {}", dir.path().display());
        Ok(Self {
            dir,
            info: PexInfo::default(),
            interpreter,
            preamble,
            shebang: None,
            sources: HashMap::new(),
            frozen: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn info(&self) -> &PexInfo {
        &self.info
    }

    /// Mutable metadata, refused once frozen
    pub fn info_mut(&mut self) -> PexResult<&mut PexInfo> {
        self.ensure_unfrozen()?;
        Ok(&mut self.info)
    }

    pub fn interpreter(&self) -> Option<&Interpreter> {
        self.interpreter.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn ensure_unfrozen(&self) -> PexResult<()> {
        if self.frozen {
            return Err(PexError::Internal(
                "the workspace is frozen and can no longer be modified".to_string(),
            ));
        }
        Ok(())
    }

    /// Add one source file at `dst`, relative to the workspace root.
    ///
    /// The first file added at a path wins. Later files for the same path
    /// are skipped with a warning naming both origins. Returns whether the
    /// file was added.
    pub fn add_source(&mut self, src: &Path, dst: &Path) -> PexResult<bool> {
        self.ensure_unfrozen()?;

        if !dst.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(PexError::InvalidPex {
                path: dst.to_path_buf(),
                reason: "source paths must be relative and stay inside the PEX".to_string(),
            });
        }
        if let Some(Component::Normal(first)) = dst.components().next() {
            if RESERVED.iter().any(|r| first == *r) {
                warn!(
                    "Skipping source {}: {} is reserved by the PEX layout",
                    src.display(),
                    dst.display()
                );
                return Ok(false);
            }
        }

        if let Some(existing) = self.sources.get(dst) {
            warn!(
                "Skipping {}: {} was already added from {}",
                src.display(),
                dst.display(),
                existing.display()
            );
            return Ok(false);
        }

        hardlink_or_copy(src, &self.path().join(dst))?;
        self.sources.insert(dst.to_path_buf(), src.to_path_buf());
        Ok(true)
    }

    /// Add every file under `directory`, preserving relative paths.
    pub fn add_source_directory(&mut self, directory: &Path) -> PexResult<usize> {
        let mut added = 0;
        for (relative, path) in walk_files(directory)? {
            if self.add_source(&path, &relative)? {
                added += 1;
            }
        }
        debug!("Added {} files from {}", added, directory.display());
        Ok(added)
    }

    /// Copy a resolved distribution under `.deps` and record it.
    pub fn add_distribution(&mut self, distribution: &Distribution) -> PexResult<()> {
        self.ensure_unfrozen()?;

        let key = distribution.key();
        let dest = self.path().join(DEPS_DIR).join(&key);
        if !self.info.distributions.contains_key(&key) {
            for file in &distribution.files {
                hardlink_or_copy(&distribution.location.join(file), &dest.join(file))?;
            }
        }

        let entry = self
            .info
            .distributions
            .entry(key)
            .or_insert_with(|| DistributionInfo {
                project_name: distribution.project_name.clone(),
                version: distribution.version.clone(),
                fingerprint: distribution.fingerprint.clone(),
                targets: Vec::new(),
            });
        if !entry.targets.contains(&distribution.target_tag) {
            entry.targets.push(distribution.target_tag.clone());
        }
        Ok(())
    }

    /// Record a direct requirement.
    pub fn add_requirement(&mut self, requirement: &str) -> PexResult<()> {
        self.ensure_unfrozen()?;
        if !self.info.requirements.iter().any(|r| r == requirement) {
            self.info.requirements.push(requirement.to_string());
        }
        Ok(())
    }

    pub fn add_interpreter_constraint(&mut self, constraint: &str) -> PexResult<()> {
        self.ensure_unfrozen()?;
        if !self.info.interpreter_constraints.iter().any(|c| c == constraint) {
            self.info.interpreter_constraints.push(constraint.to_string());
        }
        Ok(())
    }

    /// Merge the distributions and requirements of another loose PEX.
    pub fn add_from_requirements_pex(&mut self, pex: &Path) -> PexResult<()> {
        self.ensure_unfrozen()?;
        let other = PexInfo::load(pex)?;

        for (key, dist) in &other.distributions {
            let source = pex.join(DEPS_DIR).join(key);
            let dest = self.path().join(DEPS_DIR).join(key);
            if !self.info.distributions.contains_key(key) {
                copy_tree(&source, &dest)?;
            }
            let entry = self
                .info
                .distributions
                .entry(key.clone())
                .or_insert_with(|| DistributionInfo {
                    targets: Vec::new(),
                    ..dist.clone()
                });
            for target in &dist.targets {
                if !entry.targets.contains(target) {
                    entry.targets.push(target.clone());
                }
            }
        }
        for requirement in &other.requirements {
            self.add_requirement(requirement)?;
        }
        debug!(
            "Merged {} distributions from {}",
            other.distributions.len(),
            pex.display()
        );
        Ok(())
    }

    pub fn set_entry_point(&mut self, entry_point: &str) -> PexResult<()> {
        self.info_mut()?.entry_point = Some(entry_point.to_string());
        Ok(())
    }

    /// Run a console script from one of the packaged distributions.
    pub fn set_script(&mut self, script: &str) -> PexResult<()> {
        self.ensure_unfrozen()?;
        if !self.has_console_script(script)? {
            return Err(PexError::InvalidPex {
                path: self.path().to_path_buf(),
                reason: format!("Could not find script {:?} in any distribution within PEX", script),
            });
        }
        self.info.script = Some(script.to_string());
        Ok(())
    }

    fn has_console_script(&self, script: &str) -> PexResult<bool> {
        let deps = self.path().join(DEPS_DIR);
        if !deps.is_dir() {
            return Ok(false);
        }
        for (relative, path) in walk_files(&deps)? {
            let in_dist_info = relative
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|n| n.to_string_lossy().ends_with(".dist-info"));
            if !in_dist_info || relative.file_name() != Some(OsStr::new("entry_points.txt")) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .map_err(|e| PexError::io(format!("reading {}", path.display()), e))?;
            if console_scripts(&content).any(|name| name == script) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn set_shebang(&mut self, shebang: &str) -> PexResult<()> {
        self.ensure_unfrozen()?;
        self.shebang = Some(shebang.trim_start_matches("#!").to_string());
        Ok(())
    }

    /// The shebang interpreter line, without `#!`
    pub fn shebang(&self) -> String {
        if let Some(shebang) = &self.shebang {
            return shebang.clone();
        }
        match &self.interpreter {
            Some(interpreter) => {
                let name = match interpreter.implementation() {
                    crate::interpreter::Implementation::PyPy => "pypy",
                    _ => "python",
                };
                format!(
                    "/usr/bin/env {}{}.{}",
                    name,
                    interpreter.version().major,
                    interpreter.version().minor
                )
            }
            None => "/usr/bin/env python3".to_string(),
        }
    }

    /// Write `__main__.py` and `PEX-INFO`, compute content hashes and
    /// optionally byte-compile. No mutation is allowed afterwards.
    pub async fn freeze(&mut self, compile: bool) -> PexResult<()> {
        self.ensure_unfrozen()?;

        let main_path = self.path().join(MAIN);
        fs::write(&main_path, render_main(&self.shebang(), self.preamble.as_deref()))
            .map_err(|e| PexError::io(format!("writing {}", main_path.display()), e))?;

        let files = walk_files(self.path())?;
        let code: Vec<_> = files
            .iter()
            .filter(|(relative, _)| {
                !relative.starts_with(DEPS_DIR) && relative.as_path() != Path::new(MAIN)
            })
            .cloned()
            .collect();
        self.info.code_hash = Some(hex::encode(hash_files(&code)?.finalize()));

        self.info.pex_hash = None;
        let mut hasher = hash_files(&files)?;
        hasher.update(self.info.dump()?.as_bytes());
        self.info.pex_hash = Some(hex::encode(hasher.finalize()));
        self.info.write(self.path())?;

        if compile {
            self.compile().await?;
        }

        self.frozen = true;
        debug!(
            "Froze workspace {} with pex_hash {}",
            self.path().display(),
            self.info.pex_hash.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    async fn compile(&self) -> PexResult<()> {
        let Some(interpreter) = &self.interpreter else {
            warn!("No interpreter available to byte-compile with; skipping --compile");
            return Ok(());
        };
        let command = format!("{} -m compileall", interpreter.binary().display());
        let output = Command::new(interpreter.binary())
            .args(["-m", "compileall", "-q"])
            .arg(self.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PexError::command_failed(command.clone(), e))?;
        if !output.status.success() {
            return Err(PexError::command_exec(
                command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Names declared in the `[console_scripts]` section of an `entry_points.txt`
fn console_scripts(content: &str) -> impl Iterator<Item = &str> {
    let mut section = "";
    content.lines().filter_map(move |line| {
        let line = line.trim();
        if line.starts_with('[') {
            section = line.trim_matches(|c: char| c == '[' || c == ']');
            return None;
        }
        if section != "console_scripts" {
            return None;
        }
        line.split_once('=').map(|(name, _)| name.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::selector::tests::cpython;

    fn workspace(tmp: &TempDir) -> Workspace {
        Workspace::new(tmp.path(), Some(cpython("/usr/bin/python3.11", "3.11.4", &[])), None).unwrap()
    }

    fn source_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn first_source_directory_wins() {
        let tmp = TempDir::new().unwrap();
        let mut ws = workspace(&tmp);
        let first = source_dir(&[("app/main.py", "first"), ("a.py", "a")]);
        let second = source_dir(&[("app/main.py", "second"), ("b.py", "b")]);

        assert_eq!(ws.add_source_directory(first.path()).unwrap(), 2);
        assert_eq!(ws.add_source_directory(second.path()).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(ws.path().join("app/main.py")).unwrap(),
            "first"
        );
        assert!(ws.path().join("b.py").exists());
    }

    #[test]
    fn reserved_and_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let mut ws = workspace(&tmp);
        let src = source_dir(&[("x.py", "")]);
        let file = src.path().join("x.py");
        assert!(!ws.add_source(&file, Path::new("__main__.py")).unwrap());
        assert!(!ws.add_source(&file, Path::new(".deps/evil.py")).unwrap());
        assert!(ws.add_source(&file, Path::new("../x.py")).is_err());
    }

    fn distribution(location: &Path, target: &str) -> Distribution {
        Distribution {
            project_name: "six".into(),
            version: "1.16.0".into(),
            location: location.to_path_buf(),
            files: vec![PathBuf::from("six.py")],
            fingerprint: "abc".into(),
            target_tag: target.into(),
        }
    }

    #[test]
    fn distributions_merge_targets() {
        let tmp = TempDir::new().unwrap();
        let mut ws = workspace(&tmp);
        let site = source_dir(&[("six.py", "# six")]);

        ws.add_distribution(&distribution(site.path(), "cp311")).unwrap();
        ws.add_distribution(&distribution(site.path(), "cp39")).unwrap();
        ws.add_distribution(&distribution(site.path(), "cp39")).unwrap();

        let info = &ws.info().distributions["six-1.16.0-abc"];
        assert_eq!(info.targets, vec!["cp311", "cp39"]);
        assert!(ws.path().join(".deps/six-1.16.0-abc/six.py").is_file());
    }

    #[tokio::test]
    async fn freeze_is_deterministic_and_final() {
        let src = source_dir(&[("app.py", "print('hi')")]);
        let mut hashes = Vec::new();
        for _ in 0..2 {
            let tmp = TempDir::new().unwrap();
            let mut ws = workspace(&tmp);
            ws.add_source_directory(src.path()).unwrap();
            ws.set_entry_point("app").unwrap();
            ws.add_requirement("six").unwrap();
            ws.freeze(false).await.unwrap();

            assert!(ws.is_frozen());
            assert!(ws.path().join("__main__.py").is_file());
            let written = PexInfo::load(ws.path()).unwrap();
            assert_eq!(&written, ws.info());
            assert!(ws.add_requirement("idna").is_err());
            assert!(ws.freeze(false).await.is_err());
            hashes.push(written.pex_hash.unwrap());
        }
        assert_eq!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn content_changes_hash() {
        let mut hashes = Vec::new();
        for content in ["a = 1", "a = 2"] {
            let src = source_dir(&[("app.py", content)]);
            let tmp = TempDir::new().unwrap();
            let mut ws = workspace(&tmp);
            ws.add_source_directory(src.path()).unwrap();
            ws.freeze(false).await.unwrap();
            hashes.push(ws.info().pex_hash.clone().unwrap());
        }
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn default_shebang_follows_interpreter() {
        let tmp = TempDir::new().unwrap();
        let mut ws = workspace(&tmp);
        assert_eq!(ws.shebang(), "/usr/bin/env python3.11");
        ws.set_shebang("#!/opt/python/bin/python3").unwrap();
        assert_eq!(ws.shebang(), "/opt/python/bin/python3");

        let bare = Workspace::new(tmp.path(), None, None).unwrap();
        assert_eq!(bare.shebang(), "/usr/bin/env python3");
    }

    #[test]
    fn script_must_exist_in_distributions() {
        let tmp = TempDir::new().unwrap();
        let mut ws = workspace(&tmp);
        assert!(ws.set_script("black").is_err());

        let dist_info = ws.path().join(".deps/black-24.1.0-ff/black-24.1.0.dist-info");
        fs::create_dir_all(&dist_info).unwrap();
        fs::write(
            dist_info.join("entry_points.txt"),
            "[console_scripts]\nblack = black:patched_main\nblackd = blackd:patched_main [d]\n",
        )
        .unwrap();
        ws.set_script("blackd").unwrap();
        assert_eq!(ws.info().script.as_deref(), Some("blackd"));
    }

    #[test]
    fn requirements_pex_merge() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let mut info = PexInfo::default();
        info.requirements.push("six".into());
        info.distributions.insert(
            "six-1.16.0-abc".into(),
            DistributionInfo {
                project_name: "six".into(),
                version: "1.16.0".into(),
                fingerprint: "abc".into(),
                targets: vec!["cp311".into()],
            },
        );
        info.write(other.path()).unwrap();
        let deps = other.path().join(".deps/six-1.16.0-abc");
        fs::create_dir_all(&deps).unwrap();
        fs::write(deps.join("six.py"), "").unwrap();

        let mut ws = workspace(&tmp);
        ws.add_from_requirements_pex(other.path()).unwrap();
        assert_eq!(ws.info().requirements, vec!["six"]);
        assert_eq!(ws.info().distributions["six-1.16.0-abc"].targets, vec!["cp311"]);
        assert!(ws.path().join(".deps/six-1.16.0-abc/six.py").is_file());
    }
}
