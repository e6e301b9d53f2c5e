//! Loose-layout artifact writer
//!
//! A loose PEX is a directory: `__main__.py`, `PEX-INFO`, user sources at the
//! top level and one `.deps/<key>/` directory per distribution.

use crate::error::PexResult;
use crate::fsutil::{copy_tree, replace_with, set_executable, staging_sibling};
use std::fs;
use std::path::Path;
use tracing::info;

/// Bootstrap executed as the PEX's `__main__.py`
const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Name of the bootstrap module inside a PEX
pub const MAIN: &str = "__main__.py";

/// Directory holding packaged distributions
pub const DEPS_DIR: &str = ".deps";

/// Render `__main__.py`: shebang, optional preamble, then the bootstrap.
pub fn render_main(shebang: &str, preamble: Option<&str>) -> String {
    let mut main = String::with_capacity(BOOTSTRAP.len() + 256);
    main.push_str("#!");
    main.push_str(shebang.trim_start_matches("#!"));
    main.push('\n');
    if let Some(preamble) = preamble {
        main.push_str(preamble);
        if !preamble.ends_with('\n') {
            main.push('\n');
        }
    }
    main.push_str(BOOTSTRAP);
    main
}

/// Copy a frozen workspace to `output`, replacing anything already there.
///
/// The copy is staged next to `output` and renamed into place.
pub fn write_loose(workspace: &Path, output: &Path) -> PexResult<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| crate::error::PexError::io(format!("creating {}", parent.display()), e))?;
    }

    let staging = staging_sibling(output);
    let result = copy_tree(workspace, &staging)
        .and_then(|()| set_executable(&staging.join(MAIN)))
        .and_then(|()| replace_with(&staging, output));
    if result.is_err() {
        let _ = fs::remove_dir_all(&staging);
    }
    result?;

    info!("Saved PEX to {}", output.display());
    Ok(())
}
