//! Dependency resolution
//!
//! The orchestrator resolves exactly once per build through the
//! [`Resolver`] trait. Which implementation runs is decided by the
//! configured [`Repository`]: package indexes go through pip, an existing
//! PEX is resolved from the distributions it already contains.

mod config;
mod distribution;
mod marker;
mod pip;
mod repository;
mod requirement;

pub use config::{
    NetworkConfiguration, Repository, ResolveConfiguration, ResolveOptions, ResolverVersion,
    DEFAULT_MANYLINUX, PYPI,
};
pub use distribution::{
    find_dist_info, fingerprint, load_installed, parse_metadata, parse_record,
    read_installed_metadata, read_metadata, Distribution, Metadata,
};
pub use pip::PipResolver;
pub use repository::PexRepositoryResolver;
pub use requirement::{canonicalize_name, read_requirement_file, Requirement};

use crate::error::PexResult;
use crate::interpreter::Interpreter;
use crate::platform::Platform;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// One thing to resolve distributions for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    /// A local interpreter; builds from source are possible
    Interpreter(Interpreter),
    /// An abstract platform; only binary distributions qualify
    Platform(Platform),
}

impl ResolveTarget {
    /// Runtime target tag, e.g. `cp311`
    pub fn target_tag(&self) -> String {
        match self {
            Self::Interpreter(interpreter) => interpreter.target_tag(),
            Self::Platform(platform) => platform.target_tag(),
        }
    }
}

impl fmt::Display for ResolveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interpreter(interpreter) => interpreter.fmt(f),
            Self::Platform(platform) => platform.fmt(f),
        }
    }
}

/// Inputs of one resolve
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub requirements: Vec<String>,
    pub requirement_files: Vec<PathBuf>,
    pub constraint_files: Vec<PathBuf>,
    pub targets: Vec<ResolveTarget>,
    /// Interpreter that drives resolution for platform targets
    pub runner: Option<Interpreter>,
    /// Scratch directory the back end may install into; outlives the result
    pub work_dir: PathBuf,
    /// Back-end download cache
    pub cache_dir: Option<PathBuf>,
    pub compile: bool,
    /// Log unsatisfied or inconsistent requirements instead of failing
    pub ignore_errors: bool,
}

impl ResolveRequest {
    /// True when there is nothing to resolve
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.requirement_files.is_empty()
    }
}

/// A resolved distribution plus the requirement that pulled it in, when it
/// was requested directly rather than as a transitive dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledDistribution {
    pub distribution: Distribution,
    pub direct_requirement: Option<String>,
}

/// Output of one resolve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveResult {
    pub installed_distributions: Vec<InstalledDistribution>,
}

/// Resolution back end
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve the request, failing with [`PexError::Unsatisfiable`] when no
    /// satisfying distribution set exists.
    ///
    /// [`PexError::Unsatisfiable`]: crate::error::PexError::Unsatisfiable
    async fn resolve(&self, request: &ResolveRequest) -> PexResult<ResolveResult>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Create the resolver matching the configured repository
pub fn resolver_for(config: &ResolveConfiguration) -> Box<dyn Resolver> {
    match &config.repository {
        Repository::Pex { path } => Box::new(PexRepositoryResolver::new(
            path.clone(),
            config.transitive,
        )),
        Repository::Index { .. } => Box::new(PipResolver::new(config.clone())),
    }
}

/// Match the requested requirement strings to a resolved project name
pub(crate) fn direct_requirement_for(requirements: &[Requirement], project_name: &str) -> Option<String> {
    let name = canonicalize_name(project_name);
    requirements
        .iter()
        .find(|r| r.name() == name)
        .map(|r| r.as_str().to_string())
}
