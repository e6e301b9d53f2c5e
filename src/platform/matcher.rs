//! Matching declared platforms against local interpreters

use crate::interpreter::{find_compatible, Interpreter, InterpreterConstraints, InterpreterProbe, SearchPath};
use crate::platform::PlatformTarget;
use tracing::{debug, info};

/// Outcome of platform matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformMatch {
    /// Local interpreters that claimed at least one declared platform, in
    /// candidate order
    pub interpreters: Vec<Interpreter>,
    /// Declared platforms left for binary-only resolution, in declaration order
    pub unresolved: Vec<PlatformTarget>,
}

/// Split declared platforms into those served by a local interpreter and
/// those left for binary-only resolution.
///
/// Candidates are visited in order. Each declared tag is claimed by the
/// first candidate supporting it and is not examined again. A candidate
/// appears in the result once, however many tags it claims. The `current`
/// sentinel is never claimed. With `resolve_local` off every declared
/// platform stays unresolved.
pub fn match_local_platforms(
    platforms: &[PlatformTarget],
    candidates: &[Interpreter],
    resolve_local: bool,
) -> PlatformMatch {
    let mut remaining: Vec<PlatformTarget> = Vec::with_capacity(platforms.len());
    for platform in platforms {
        if !remaining.contains(platform) {
            remaining.push(platform.clone());
        }
    }

    let mut interpreters: Vec<Interpreter> = Vec::new();
    if resolve_local {
        for candidate in candidates {
            let before = remaining.len();
            remaining.retain(|target| match target {
                PlatformTarget::Tag(platform) if candidate.supports(platform) => {
                    debug!("Resolved {} for platform {}", candidate, platform);
                    false
                }
                _ => true,
            });
            if remaining.len() < before && !interpreters.contains(candidate) {
                interpreters.push(candidate.clone());
            }
        }
    }

    PlatformMatch {
        interpreters,
        unresolved: remaining,
    }
}

/// Probe the search path plus the current interpreter and match the declared
/// platforms against them. Probe failures only shrink the candidate set.
pub async fn match_platforms(
    probe: &dyn InterpreterProbe,
    search_path: &SearchPath,
    platforms: &[PlatformTarget],
    resolve_local: bool,
) -> PlatformMatch {
    if platforms.is_empty() || !resolve_local {
        return match_local_platforms(platforms, &[], false);
    }

    let listing = platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    info!("Searching for local interpreters matching {}", listing);

    let mut candidates =
        match find_compatible(probe, search_path, &InterpreterConstraints::default()).await {
            Ok(found) => found,
            Err(e) => {
                debug!("Interpreter discovery failed: {}", e);
                Vec::new()
            }
        };
    match probe.current().await {
        Ok(current) if !candidates.contains(&current) => candidates.push(current),
        Ok(_) => {}
        Err(e) => debug!("No current interpreter to match against: {}", e),
    }

    let matched = match_local_platforms(platforms, &candidates, true);
    if !matched.unresolved.is_empty() {
        info!(
            "Could not resolve a local interpreter for {}, will resolve only binary distributions for {}.",
            matched
                .unresolved
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            if matched.unresolved.len() == 1 {
                "this platform"
            } else {
                "these platforms"
            }
        );
    }
    matched
}
