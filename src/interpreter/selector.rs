//! Interpreter selection
//!
//! Turns the user's interpreter intent into an ordered, de-duplicated list of
//! probed interpreters, and picks the primary interpreter that drives local
//! builds.

use crate::error::{PexError, PexResult};
use crate::interpreter::constraints::InterpreterConstraints;
use crate::interpreter::descriptor::Interpreter;
use crate::interpreter::discovery::{find_candidates, SearchPath};
use crate::interpreter::probe::InterpreterProbe;
use futures_util::future::join_all;
use std::cmp::Reverse;
use std::path::Path;
use tracing::{debug, info};

/// What the user asked for
#[derive(Debug, Clone)]
pub enum InterpreterSelection {
    /// Neither `--python` nor `--interpreter-constraint`
    Default,
    /// `--python` values: absolute paths or names on `PATH`
    Explicit(Vec<String>),
    /// `--interpreter-constraint` values, already validated
    Constrained(InterpreterConstraints),
}

impl InterpreterSelection {
    /// Build a selection from raw option values.
    ///
    /// Conflicting options and malformed constraints are rejected here,
    /// before any interpreter is probed.
    pub fn new(pythons: &[String], constraints: &[String]) -> PexResult<Self> {
        if !pythons.is_empty() && !constraints.is_empty() {
            return Err(PexError::ConfigConflict(
                "The \"--python\" and \"--interpreter-constraint\" options cannot be used together."
                    .to_string(),
            ));
        }
        if !pythons.is_empty() {
            return Ok(Self::Explicit(pythons.to_vec()));
        }
        if !constraints.is_empty() {
            return Ok(Self::Constrained(InterpreterConstraints::parse_all(
                constraints,
            )?));
        }
        Ok(Self::Default)
    }

    /// Probe the selected interpreters. `Default` selects nothing; callers
    /// fall back to the current interpreter when they need one.
    pub async fn resolve(
        &self,
        probe: &dyn InterpreterProbe,
        search_path: &SearchPath,
    ) -> PexResult<Vec<Interpreter>> {
        match self {
            Self::Default => Ok(Vec::new()),
            Self::Explicit(identifiers) => resolve_explicit(probe, identifiers).await,
            Self::Constrained(constraints) => {
                find_compatible(probe, search_path, constraints).await
            }
        }
    }

    /// Constraint strings to record in the built PEX
    pub fn constraints(&self) -> Vec<String> {
        match self {
            Self::Constrained(constraints) => constraints.to_strings(),
            _ => Vec::new(),
        }
    }
}

/// Resolve explicit interpreter identifiers in order.
///
/// An identifier that is an existing file is probed directly; anything else
/// is looked up by name on `PATH`.
pub async fn resolve_explicit(
    probe: &dyn InterpreterProbe,
    identifiers: &[String],
) -> PexResult<Vec<Interpreter>> {
    let probes = identifiers.iter().map(|id| async move {
        let path = Path::new(id);
        if path.is_file() {
            probe.from_binary(path).await
        } else {
            probe
                .from_env(id)
                .await?
                .ok_or_else(|| PexError::InterpreterNotFound(id.clone()))
        }
    });

    let mut interpreters = Vec::with_capacity(identifiers.len());
    for result in join_all(probes).await {
        push_unique(&mut interpreters, result?);
    }
    Ok(interpreters)
}

/// Probe every interpreter on the search path and keep those matching at
/// least one constraint. With no constraints every identifiable interpreter
/// is kept.
///
/// Probes run concurrently; the result keeps discovery order.
pub async fn find_compatible(
    probe: &dyn InterpreterProbe,
    search_path: &SearchPath,
    constraints: &InterpreterConstraints,
) -> PexResult<Vec<Interpreter>> {
    let candidates = find_candidates(search_path);
    debug!(
        "Probing {} interpreter candidates on {}",
        candidates.len(),
        search_path.description()
    );

    let results = join_all(candidates.iter().map(|c| probe.from_binary(c))).await;

    let mut compatible = Vec::new();
    let mut failures = Vec::new();
    for (candidate, result) in candidates.iter().zip(results) {
        match result {
            Ok(interpreter) => {
                if constraints.is_empty() || constraints.matches_any(&interpreter) {
                    push_unique(&mut compatible, interpreter);
                } else {
                    debug!("Interpreter {} does not match constraints", interpreter);
                }
            }
            Err(e) => {
                debug!("Skipping {}: {}", candidate.display(), e);
                failures.push(e.to_string());
            }
        }
    }

    if compatible.is_empty() && !constraints.is_empty() {
        return Err(PexError::UnsatisfiableConstraints {
            constraints: constraints.to_strings(),
            search_path: search_path.description().to_string(),
            failures,
        });
    }

    info!(
        "Found {} compatible interpreter(s) on {}",
        compatible.len(),
        search_path.description()
    );
    Ok(compatible)
}

/// Pick the primary interpreter: the lowest compatible release line, and
/// within that line the newest patch release. Ties keep the earliest
/// candidate.
pub fn select_primary(interpreters: &[Interpreter]) -> Option<&Interpreter> {
    interpreters.iter().min_by_key(|i| {
        let v = i.version();
        (v.major, v.minor, Reverse(v.patch))
    })
}

pub(crate) fn push_unique(interpreters: &mut Vec<Interpreter>, interpreter: Interpreter) {
    if !interpreters.contains(&interpreter) {
        interpreters.push(interpreter);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interpreter::descriptor::Implementation;
    use async_trait::async_trait;
    use semver::Version;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe answering from a fixed table, counting calls
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub interpreters: HashMap<PathBuf, Interpreter>,
        pub calls: AtomicUsize,
    }

    impl FakeProbe {
        pub fn with(interpreters: Vec<Interpreter>) -> Self {
            Self {
                interpreters: interpreters
                    .into_iter()
                    .map(|i| (i.binary().to_path_buf(), i))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InterpreterProbe for FakeProbe {
        async fn from_binary(&self, binary: &Path) -> PexResult<Interpreter> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.interpreters
                .get(binary)
                .cloned()
                .ok_or_else(|| PexError::ProbeFailed {
                    binary: binary.to_path_buf(),
                    reason: "not an interpreter".to_string(),
                })
        }

        async fn from_env(&self, name: &str) -> PexResult<Option<Interpreter>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .interpreters
                .values()
                .find(|i| i.binary().file_name().and_then(|n| n.to_str()) == Some(name))
                .cloned())
        }
    }

    pub(crate) fn cpython(binary: &str, version: &str, platforms: &[&str]) -> Interpreter {
        Interpreter::new(
            PathBuf::from(binary),
            Implementation::CPython,
            Version::parse(version).unwrap(),
            platforms.iter().map(|p| p.parse().unwrap()).collect(),
        )
    }

    #[test]
    fn python_and_constraints_conflict() {
        let err = InterpreterSelection::new(&["python3".into()], &[">=3.8".into()]).unwrap_err();
        assert!(matches!(err, PexError::ConfigConflict(_)));
        assert_eq!(err.exit_code(), crate::error::INVALID_OPTIONS);
    }

    #[test]
    fn malformed_constraint_fails_before_probing() {
        let err = InterpreterSelection::new(&[], &["CPython>=>3".into()]).unwrap_err();
        assert!(matches!(err, PexError::InvalidConstraint { .. }));
    }

    #[tokio::test]
    async fn explicit_missing_binary_names_identifier() {
        let probe = FakeProbe::default();
        let err = resolve_explicit(&probe, &["/no/such/binary".into()])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::CANNOT_SETUP_INTERPRETER);
        assert!(err.to_string().contains("/no/such/binary"));
    }

    #[tokio::test]
    async fn explicit_names_resolve_in_order() {
        let probe = FakeProbe::with(vec![
            cpython("/usr/bin/python3.11", "3.11.4", &[]),
            cpython("/usr/bin/python3.9", "3.9.18", &[]),
        ]);
        let found = resolve_explicit(
            &probe,
            &["python3.9".into(), "python3.11".into(), "python3.9".into()],
        )
        .await
        .unwrap();
        let versions: Vec<_> = found.iter().map(|i| i.version().to_string()).collect();
        assert_eq!(versions, vec!["3.9.18", "3.11.4"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn constrained_selection_only_returns_matches() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let mut interpreters = Vec::new();
        for (name, version) in [("python3.8", "3.8.18"), ("python3.11", "3.11.4"), ("python3.12", "3.12.1")] {
            let path = dir.path().join(name);
            std::fs::write(&path, "").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            interpreters.push(cpython(path.to_str().unwrap(), version, &[]));
        }
        let probe = FakeProbe::with(interpreters);
        let search_path = SearchPath::parse(dir.path().to_str().unwrap());

        let constraints = InterpreterConstraints::parse_all(&[">=3.9,<3.12"]).unwrap();
        let found = find_compatible(&probe, &search_path, &constraints).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.iter().all(|i| constraints.matches_any(i)));

        let impossible = InterpreterConstraints::parse_all(&[">=4"]).unwrap();
        let err = find_compatible(&probe, &search_path, &impossible)
            .await
            .unwrap_err();
        assert!(matches!(err, PexError::UnsatisfiableConstraints { .. }));
        assert_eq!(err.exit_code(), crate::error::CANNOT_SETUP_INTERPRETER);
    }

    #[test]
    fn primary_is_newest_patch_of_oldest_line() {
        let interpreters = vec![
            cpython("/a/python3.11", "3.11.4", &[]),
            cpython("/b/python3.9", "3.9.2", &[]),
            cpython("/c/python3.9", "3.9.18", &[]),
            cpython("/d/python3.12", "3.12.0", &[]),
        ];
        let primary = select_primary(&interpreters).unwrap();
        assert_eq!(primary.binary(), Path::new("/c/python3.9"));
        assert!(select_primary(&[]).is_none());
    }

    #[test]
    fn primary_ties_keep_first() {
        let interpreters = vec![
            cpython("/a/python3.10", "3.10.1", &[]),
            cpython("/b/python3.10", "3.10.1", &[]),
        ];
        assert_eq!(
            select_primary(&interpreters).unwrap().binary(),
            Path::new("/a/python3.10")
        );
    }
}
