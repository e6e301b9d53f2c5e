//! Installing a loose PEX into the shared cache

use crate::error::PexResult;
use crate::fsutil::{copy_tree, install_once};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cache subdirectory holding installed PEXes, keyed by `pex_hash`
pub const INSTALLED_PEXES_DIR: &str = "installed_pexes";

/// Install `pex` under `<pex_root>/installed_pexes/<pex_hash>` unless an
/// installation with that hash already exists. Returns the installed
/// directory.
pub fn install_pex(pex: &Path, pex_root: &Path, pex_hash: &str) -> PexResult<PathBuf> {
    let dest = pex_root.join(INSTALLED_PEXES_DIR).join(pex_hash);
    let installed = install_once(&dest, |staging| copy_tree(pex, staging))?;
    if installed {
        info!("Installed {} to {}", pex.display(), dest.display());
    } else {
        debug!("Using cached installation {}", dest.display());
    }
    Ok(dest)
}
