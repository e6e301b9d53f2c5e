//! Filesystem helpers shared by the builder, writer and cache seeder

use crate::error::{PexError, PexResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Hard link `src` to `dest`, copying when linking is not possible.
pub fn hardlink_or_copy(src: &Path, dest: &Path) -> PexResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PexError::io(format!("creating {}", parent.display()), e))?;
    }

    if dest.exists() {
        let _ = fs::remove_file(dest);
    }

    if fs::hard_link(src, dest).is_ok() {
        return Ok(());
    }

    fs::copy(src, dest).map_err(|e| {
        PexError::io(
            format!("copying {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    Ok(())
}

/// Copy one file, creating parent directories of `dest`.
pub fn copy_file(src: &Path, dest: &Path) -> PexResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PexError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::copy(src, dest).map_err(|e| {
        PexError::io(
            format!("copying {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    Ok(())
}

/// Copy every regular file under `src` into `dst`, preserving relative paths.
///
/// Files are always copied, never linked, so the result can be modified
/// without touching `src`.
pub fn copy_tree(src: &Path, dst: &Path) -> PexResult<()> {
    for (relative, path) in walk_files(src)? {
        copy_file(&path, &dst.join(relative))?;
    }
    Ok(())
}

/// Regular files under `root` as `(relative, absolute)` pairs, sorted by
/// relative path.
pub fn walk_files(root: &Path) -> PexResult<Vec<(PathBuf, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", root.display());
            match e.into_io_error() {
                Some(source) => PexError::io(context, source),
                None => PexError::io(context, io::Error::other("filesystem loop")),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push((relative.to_path_buf(), entry.path().to_path_buf()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// A unique, hidden sibling of `dest` for staging writes before a rename.
pub fn staging_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Populate `dest` exactly once across processes.
///
/// `populate` fills a private staging directory that is then renamed onto
/// `dest`. Returns `false` without calling `populate` when `dest` already
/// exists, and also when another process won the rename race, in which case
/// the staged copy is discarded. A reader never sees a partial `dest`.
pub fn install_once<F>(dest: &Path, populate: F) -> PexResult<bool>
where
    F: FnOnce(&Path) -> PexResult<()>,
{
    if dest.exists() {
        debug!("Reusing {}", dest.display());
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PexError::io(format!("creating {}", parent.display()), e))?;
    }

    let staging = staging_sibling(dest);
    fs::create_dir(&staging)
        .map_err(|e| PexError::io(format!("creating {}", staging.display()), e))?;

    if let Err(e) = populate(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    commit_staged(&staging, dest)
}

/// Rename a fully populated `staging` directory onto `dest`.
///
/// Returns `false` and discards `staging` when `dest` appeared in the
/// meantime.
pub fn commit_staged(staging: &Path, dest: &Path) -> PexResult<bool> {
    match fs::rename(staging, dest) {
        Ok(()) => Ok(true),
        Err(_) if dest.exists() => {
            debug!("Lost install race for {}, reusing", dest.display());
            let _ = fs::remove_dir_all(staging);
            Ok(false)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(staging);
            Err(PexError::io(format!("installing {}", dest.display()), e))
        }
    }
}

/// Replace whatever is at `dest` with the staged directory `staged`.
pub fn replace_with(staged: &Path, dest: &Path) -> PexResult<()> {
    if dest.is_dir() && !dest.is_symlink() {
        fs::remove_dir_all(dest)
            .map_err(|e| PexError::io(format!("removing {}", dest.display()), e))?;
    } else if dest.exists() || dest.is_symlink() {
        fs::remove_file(dest)
            .map_err(|e| PexError::io(format!("removing {}", dest.display()), e))?;
    }
    fs::rename(staged, dest).map_err(|e| {
        PexError::io(
            format!("moving {} to {}", staged.display(), dest.display()),
            e,
        )
    })
}

/// Mark a file executable by everyone who can read it.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> PexResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata =
        fs::metadata(path).map_err(|e| PexError::io(format!("stat {}", path.display()), e))?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    permissions.set_mode(mode | ((mode & 0o444) >> 2));
    fs::set_permissions(path, permissions)
        .map_err(|e| PexError::io(format!("chmod {}", path.display()), e))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> PexResult<()> {
    Ok(())
}

/// Hash relative paths and contents of the given files, in order.
pub fn hash_files<'a, I>(files: I) -> PexResult<Sha256>
where
    I: IntoIterator<Item = &'a (PathBuf, PathBuf)>,
{
    let mut hasher = Sha256::new();
    for (relative, path) in files {
        let bytes =
            fs::read(path).map_err(|e| PexError::io(format!("reading {}", path.display()), e))?;
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    Ok(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn walk_is_sorted_and_relative() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        fs::write(dir.path().join("pkg/sub/b.py"), "").unwrap();
        fs::write(dir.path().join("pkg/a.py"), "").unwrap();
        fs::write(dir.path().join("main.py"), "").unwrap();

        let files: Vec<_> = walk_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(rel, _)| rel)
            .collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("main.py"),
                PathBuf::from("pkg/a.py"),
                PathBuf::from("pkg/sub/b.py"),
            ]
        );
    }

    #[test]
    fn install_once_reuses_existing() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("entries").join("abc");

        let first = install_once(&dest, |staging| {
            fs::write(staging.join("file"), "one").map_err(|e| PexError::io("write", e))
        })
        .unwrap();
        assert!(first);

        let mut called = false;
        let second = install_once(&dest, |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!second);
        assert!(!called);
        assert_eq!(fs::read_to_string(dest.join("file")).unwrap(), "one");

        let leftovers = fs::read_dir(root.path().join("entries")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_populate_leaves_nothing() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("abc");
        let result = install_once(&dest, |_| Err(PexError::Internal("boom".into())));
        assert!(result.is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn commit_staged_keeps_existing_winner() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("entry");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("winner"), "").unwrap();
        fs::write(dest.join("second"), "").unwrap();
        let staging = staging_sibling(&dest);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("loser"), "").unwrap();

        assert!(!commit_staged(&staging, &dest).unwrap());
        assert!(!staging.exists());
        assert!(dest.join("winner").exists());
    }

    #[test]
    fn replace_with_overwrites_directory() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("out");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("stale"), "").unwrap();
        let staged = root.path().join("staged");
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("fresh"), "").unwrap();

        replace_with(&staged, &dest).unwrap();
        assert!(dest.join("fresh").exists());
        assert!(!dest.join("stale").exists());
    }

    #[test]
    fn hash_depends_on_paths_and_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), "x").unwrap();
        let one = hex::encode(hash_files(&walk_files(dir.path()).unwrap()).unwrap().finalize());
        let again = hex::encode(hash_files(&walk_files(dir.path()).unwrap()).unwrap().finalize());
        assert_eq!(one, again);

        fs::rename(dir.path().join("a"), dir.path().join("b")).unwrap();
        let renamed = hex::encode(hash_files(&walk_files(dir.path()).unwrap()).unwrap().finalize());
        assert_ne!(one, renamed);
    }
}
