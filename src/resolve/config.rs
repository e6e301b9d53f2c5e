//! Resolve configuration
//!
//! Merges repository, network and resolution-mode settings into the single
//! value handed to a [`Resolver`](crate::resolve::Resolver).

use crate::error::{PexError, PexResult};
use std::path::PathBuf;

/// The public package index used unless `--no-pypi` is given
pub const PYPI: &str = "https://pypi.org/simple";

/// Default manylinux standard assumed for `linux_*` platforms
pub const DEFAULT_MANYLINUX: &str = "manylinux2014";

/// Which pip dependency resolver to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverVersion {
    PipLegacy,
    #[default]
    Pip2020,
}

impl ResolverVersion {
    /// Parse a `--resolver-version` value
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pip-legacy-resolver" => Ok(Self::PipLegacy),
            "pip-2020-resolver" => Ok(Self::Pip2020),
            other => Err(format!(
                "invalid resolver version '{}': expected pip-legacy-resolver or pip-2020-resolver",
                other
            )),
        }
    }
}

/// Where distributions come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repository {
    /// Package indexes and find-links locations
    Index {
        indexes: Vec<String>,
        find_links: Vec<String>,
        resolver_version: ResolverVersion,
    },
    /// Distributions already packaged in an existing PEX
    Pex { path: PathBuf },
}

/// Network settings passed through to the resolution back end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfiguration {
    pub retries: u32,
    pub timeout: u32,
    pub proxy: Option<String>,
    pub cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout: 15,
            proxy: None,
            cert: None,
            client_cert: None,
        }
    }
}

/// Everything the resolution back end needs besides the request itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveConfiguration {
    pub repository: Repository,
    pub network: NetworkConfiguration,
    pub transitive: bool,
    pub allow_prereleases: bool,
    pub allow_builds: bool,
    pub allow_wheels: bool,
    /// Manylinux standard assumed for `linux_*` platforms, `None` to disable
    pub assume_manylinux: Option<String>,
    pub max_jobs: usize,
}

impl Default for ResolveConfiguration {
    fn default() -> Self {
        Self {
            repository: Repository::Index {
                indexes: vec![PYPI.to_string()],
                find_links: Vec::new(),
                resolver_version: ResolverVersion::default(),
            },
            network: NetworkConfiguration::default(),
            transitive: true,
            allow_prereleases: false,
            allow_builds: true,
            allow_wheels: true,
            assume_manylinux: Some(DEFAULT_MANYLINUX.to_string()),
            max_jobs: default_jobs(),
        }
    }
}

/// Raw resolver options as given on the command line
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub pypi: bool,
    pub indexes: Vec<String>,
    pub find_links: Vec<String>,
    pub pex_repository: Option<PathBuf>,
    pub resolver_version: ResolverVersion,
    pub network: NetworkConfiguration,
    pub transitive: bool,
    pub allow_prereleases: bool,
    pub allow_builds: bool,
    pub allow_wheels: bool,
    pub manylinux: Option<String>,
    pub no_manylinux: bool,
    pub jobs: Option<usize>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            pypi: true,
            indexes: Vec::new(),
            find_links: Vec::new(),
            pex_repository: None,
            resolver_version: ResolverVersion::default(),
            network: NetworkConfiguration::default(),
            transitive: true,
            allow_prereleases: false,
            allow_builds: true,
            allow_wheels: true,
            manylinux: None,
            no_manylinux: false,
            jobs: None,
        }
    }
}

impl ResolveConfiguration {
    /// Validate raw options and build a configuration.
    pub fn create(options: &ResolveOptions) -> PexResult<Self> {
        let invalid = |msg: &str| Err(PexError::InvalidConfiguration(msg.to_string()));

        if !options.allow_builds && !options.allow_wheels {
            return invalid(
                "Cannot both disallow builds (--no-build) and disallow wheels (--no-wheel): \
                 no distributions could be resolved.",
            );
        }
        if options.jobs == Some(0) {
            return invalid("The number of parallel jobs (--jobs) must be at least 1.");
        }

        let repository = match &options.pex_repository {
            Some(path) => {
                if !options.pypi || !options.indexes.is_empty() || !options.find_links.is_empty() {
                    return invalid(
                        "A --pex-repository may not be combined with --index, --find-links or --no-pypi.",
                    );
                }
                Repository::Pex { path: path.clone() }
            }
            None => {
                let mut indexes = Vec::with_capacity(options.indexes.len() + 1);
                if options.pypi {
                    indexes.push(PYPI.to_string());
                }
                for index in &options.indexes {
                    if !indexes.contains(index) {
                        indexes.push(index.clone());
                    }
                }
                Repository::Index {
                    indexes,
                    find_links: options.find_links.clone(),
                    resolver_version: options.resolver_version,
                }
            }
        };

        let assume_manylinux = if options.no_manylinux {
            None
        } else {
            Some(
                options
                    .manylinux
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MANYLINUX.to_string()),
            )
        };

        Ok(Self {
            repository,
            network: options.network.clone(),
            transitive: options.transitive,
            allow_prereleases: options.allow_prereleases,
            allow_builds: options.allow_builds,
            allow_wheels: options.allow_wheels,
            assume_manylinux,
            max_jobs: options.jobs.unwrap_or_else(default_jobs),
        })
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
