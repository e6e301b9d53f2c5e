//! Build plan: which interpreters and platforms a build targets

use crate::error::PexResult;
use crate::interpreter::selector::push_unique;
use crate::interpreter::{select_primary, Interpreter, InterpreterProbe, InterpreterSelection, SearchPath};
use crate::platform::{match_platforms, PlatformTarget};
use crate::resolve::{ResolveConfiguration, ResolveTarget};
use tracing::{debug, info_span, Instrument};

/// The reconciled interpreter and platform set for one build. Read-only once
/// created.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Drives local builds; absent only for binary-only resolution without
    /// any local interpreter
    pub interpreter: Option<Interpreter>,
    /// Interpreters resolved for, in selection then match order
    pub interpreters: Vec<Interpreter>,
    /// Declared platforms no local interpreter claimed
    pub platforms: Vec<PlatformTarget>,
    /// What to resolve distributions for
    pub targets: Vec<ResolveTarget>,
    pub resolve_configuration: ResolveConfiguration,
}

impl BuildPlan {
    pub async fn create(
        selection: &InterpreterSelection,
        platforms: &[PlatformTarget],
        resolve_local_platforms: bool,
        search_path: &SearchPath,
        probe: &dyn InterpreterProbe,
        resolve_configuration: ResolveConfiguration,
    ) -> PexResult<Self> {
        let mut interpreters = selection
            .resolve(probe, search_path)
            .instrument(info_span!("resolve_interpreters"))
            .await?;

        let matched = match_platforms(probe, search_path, platforms, resolve_local_platforms)
            .instrument(info_span!("match_platforms"))
            .await;
        for interpreter in matched.interpreters {
            push_unique(&mut interpreters, interpreter);
        }
        let unresolved = matched.unresolved;

        let wants_current = unresolved.contains(&PlatformTarget::Current)
            || (interpreters.is_empty() && unresolved.is_empty());
        let current = if wants_current {
            Some(probe.current().await?)
        } else if interpreters.is_empty() {
            match probe.current().await {
                Ok(current) => Some(current),
                Err(e) => {
                    debug!("Resolving binary-only without a local interpreter: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut targets: Vec<ResolveTarget> = interpreters
            .iter()
            .cloned()
            .map(ResolveTarget::Interpreter)
            .collect();
        if interpreters.is_empty() && unresolved.is_empty() {
            if let Some(current) = &current {
                targets.push(ResolveTarget::Interpreter(current.clone()));
            }
        }
        for platform in &unresolved {
            let target = match platform {
                PlatformTarget::Tag(tag) => ResolveTarget::Platform(tag.clone()),
                PlatformTarget::Current => match &current {
                    Some(current) => ResolveTarget::Interpreter(current.clone()),
                    None => continue,
                },
            };
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        let interpreter = select_primary(&interpreters).cloned().or(current);
        debug!(
            "Build plan: primary {:?}, {} interpreter(s), {} target(s)",
            interpreter.as_ref().map(ToString::to_string),
            interpreters.len(),
            targets.len()
        );

        Ok(Self {
            interpreter,
            interpreters,
            platforms: unresolved,
            targets,
            resolve_configuration,
        })
    }
}
