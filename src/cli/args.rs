//! CLI argument definitions using clap derive

use crate::build::{BinPath, DeprecatedOptions, InheritPath, RuntimeOptions};
use crate::platform::PlatformTarget;
use crate::resolve::{NetworkConfiguration, ResolveOptions, ResolverVersion};
use crate::seed::SeedMode;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// pex - build executable Python environments
///
/// Resolves requirements for one or more interpreters or platforms and
/// bundles them with your sources into a single runnable PEX directory.
/// Without -o the PEX is run immediately; arguments after `--` are passed
/// to it.
#[derive(Parser, Debug)]
#[command(name = "pex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Requirements to add to the PEX
    pub requirements: Vec<String>,

    /// Arguments passed to the PEX when running it without -o
    #[arg(last = true)]
    pub passthrough: Vec<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    // Output
    /// Write the PEX to this path instead of running it
    #[arg(short = 'o', long = "output-file", value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Python code executed before the bootstrap
    #[arg(short = 'p', long = "preamble-file", value_name = "FILE")]
    pub preamble_file: Option<PathBuf>,

    /// Add sources from this directory (repeatable)
    #[arg(short = 'D', long = "sources-directory", value_name = "DIR")]
    pub sources_directory: Vec<PathBuf>,

    /// Deprecated alias for -D
    #[arg(short = 'R', long = "resources-directory", value_name = "DIR")]
    pub resources_directory: Vec<PathBuf>,

    /// Add requirements from this file (repeatable)
    #[arg(short = 'r', long = "requirement", value_name = "FILE")]
    pub requirement_files: Vec<PathBuf>,

    /// Constrain resolution with this file (repeatable)
    #[arg(long = "constraints", value_name = "FILE")]
    pub constraint_files: Vec<PathBuf>,

    /// Add the distributions and requirements of another PEX (repeatable)
    #[arg(long = "requirements-pex", value_name = "PEX")]
    pub requirements_pexes: Vec<PathBuf>,

    // Entry point
    /// Module or module:callable to run
    #[arg(short = 'm', short_alias = 'e', long = "entry-point", value_name = "MODULE[:SYMBOL]")]
    pub entry_point: Option<String>,

    /// Console script from one of the distributions to run
    #[arg(short = 'c', long = "script", alias = "console-script", value_name = "NAME")]
    pub script: Option<String>,

    /// Import the entry point after building to check it
    #[arg(long = "validate-entry-point")]
    pub validate_entry_point: bool,

    // Interpreters and platforms
    /// Interpreter to build for: a path or a name on PATH (repeatable)
    #[arg(long = "python", value_name = "PYTHON")]
    pub python: Vec<String>,

    /// Interpreter search path for constraints and local platforms
    #[arg(long = "python-path", value_name = "PATH")]
    pub python_path: Option<String>,

    /// Interpreter constraint, e.g. CPython>=3.8,<4 (repeatable, OR-ed)
    #[arg(long = "interpreter-constraint", value_name = "CONSTRAINT")]
    pub interpreter_constraint: Vec<String>,

    /// Target platform, PLATFORM-IMPL-VERSION-ABI or `current` (repeatable)
    #[arg(long = "platform", value_name = "PLATFORM", value_parser = PlatformTarget::parse)]
    pub platforms: Vec<PlatformTarget>,

    /// Use local interpreters for matching platforms
    #[arg(long = "resolve-local-platforms")]
    pub resolve_local_platforms: bool,

    /// Shebang line of __main__.py
    #[arg(long = "python-shebang", value_name = "SHEBANG")]
    pub python_shebang: Option<String>,

    // Resolver
    /// Do not use PyPI
    #[arg(long = "no-pypi")]
    pub no_pypi: bool,

    /// Additional package index (repeatable)
    #[arg(short = 'i', long = "index", alias = "index-url", value_name = "URL")]
    pub indexes: Vec<String>,

    /// Additional find-links location (repeatable)
    #[arg(short = 'f', long = "find-links", alias = "repo", value_name = "PATH/URL")]
    pub find_links: Vec<String>,

    /// Resolve from the distributions of an existing PEX
    #[arg(long = "pex-repository", value_name = "PEX")]
    pub pex_repository: Option<PathBuf>,

    /// pip resolver to use
    #[arg(long = "resolver-version", value_name = "VERSION", value_parser = ResolverVersion::parse, default_value = "pip-2020-resolver")]
    pub resolver_version: ResolverVersion,

    /// Allow pre-release versions
    #[arg(long = "pre")]
    pub pre: bool,

    /// Do not allow sdist builds
    #[arg(long = "no-build")]
    pub no_build: bool,

    /// Do not allow wheels
    #[arg(long = "no-wheel")]
    pub no_wheel: bool,

    /// Resolve only the named requirements, not their dependencies
    #[arg(long = "intransitive", alias = "no-transitive")]
    pub intransitive: bool,

    /// Manylinux standard assumed for linux platforms
    #[arg(long = "manylinux", value_name = "STANDARD")]
    pub manylinux: Option<String>,

    /// Do not assume manylinux compatibility
    #[arg(long = "no-manylinux", conflicts_with = "manylinux")]
    pub no_manylinux: bool,

    /// Maximum parallel resolve jobs
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Network retries
    #[arg(long = "retries", value_name = "N", default_value_t = 5)]
    pub retries: u32,

    /// Network timeout in seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 15)]
    pub timeout: u32,

    /// Proxy URL
    #[arg(long = "proxy", value_name = "URL")]
    pub proxy: Option<String>,

    /// CA bundle
    #[arg(long = "cert", value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// Client certificate
    #[arg(long = "client-cert", value_name = "FILE")]
    pub client_cert: Option<PathBuf>,

    // Runtime behaviour
    /// Run the PEX from a venv; optionally put its bin dir on PATH
    #[arg(long = "venv", value_name = "prepend|append", num_args = 0..=1, require_equals = true, default_missing_value = "false", value_parser = BinPath::parse)]
    pub venv: Option<BinPath>,

    /// Copy rather than symlink the venv interpreter
    #[arg(long = "venv-copies")]
    pub venv_copies: bool,

    /// Include the pex tools in the PEX
    #[arg(long = "include-tools")]
    pub include_tools: bool,

    /// Additional PEXes to merge at runtime, separated by the path separator
    #[arg(long = "pex-path", value_name = "PATHS")]
    pub pex_path: Option<String>,

    /// Ignore requirement mismatches at runtime
    #[arg(long = "ignore-errors")]
    pub ignore_errors: bool,

    /// Emit runtime warnings
    #[arg(long = "emit-warnings", overrides_with = "no_emit_warnings")]
    pub emit_warnings: bool,

    /// Suppress runtime warnings
    #[arg(long = "no-emit-warnings", overrides_with = "emit_warnings")]
    pub no_emit_warnings: bool,

    /// Inherit the ambient sys.path (bare flag means prefer)
    #[arg(long = "inherit-path", value_name = "false|fallback|prefer", num_args = 0..=1, require_equals = true, default_missing_value = "prefer", value_parser = InheritPath::parse)]
    pub inherit_path: Option<InheritPath>,

    /// Pex root the built PEX uses at runtime
    #[arg(long = "runtime-pex-root", value_name = "DIR")]
    pub runtime_pex_root: Option<String>,

    /// Strip PEX_* variables before running user code
    #[arg(long = "strip-pex-env", overrides_with = "no_strip_pex_env")]
    pub strip_pex_env: bool,

    /// Keep PEX_* variables for user code
    #[arg(long = "no-strip-pex-env", overrides_with = "strip_pex_env")]
    pub no_strip_pex_env: bool,

    /// Byte-compile sources and distributions
    #[arg(long = "compile", overrides_with = "no_compile")]
    pub compile: bool,

    /// Do not byte-compile (default)
    #[arg(long = "no-compile", overrides_with = "compile")]
    pub no_compile: bool,

    // Deprecated no-ops
    /// Deprecated, has no effect
    #[arg(long = "zip-safe", overrides_with = "not_zip_safe")]
    pub zip_safe: bool,

    /// Deprecated, has no effect
    #[arg(long = "not-zip-safe", overrides_with = "zip_safe")]
    pub not_zip_safe: bool,

    /// Deprecated, has no effect
    #[arg(long = "unzip", overrides_with = "no_unzip")]
    pub unzip: bool,

    /// Deprecated, has no effect
    #[arg(long = "no-unzip", overrides_with = "unzip")]
    pub no_unzip: bool,

    /// Deprecated, has no effect
    #[arg(long = "always-write-cache")]
    pub always_write_cache: bool,

    // Caches and scratch space
    /// Shared cache root
    #[arg(long = "pex-root", value_name = "DIR")]
    pub pex_root: Option<PathBuf>,

    /// Deprecated alias for --pex-root
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Use a throwaway pex root
    #[arg(long = "disable-cache")]
    pub disable_cache: bool,

    /// Scratch directory; must exist
    #[arg(long = "tmpdir", value_name = "DIR")]
    pub tmpdir: Option<PathBuf>,

    /// Extra rc file, read after /etc/pexrc and ~/.pexrc
    #[arg(long = "rcfile", value_name = "FILE")]
    pub rcfile: Option<PathBuf>,

    /// Seed the pex root with the built PEX and print how to run it
    #[arg(long = "seed", value_name = "none|args|verbose", num_args = 0..=1, require_equals = true, default_value = "none", default_missing_value = "args", value_parser = SeedMode::parse)]
    pub seed: SeedMode,

    /// Deprecated alias for --seed=none
    #[arg(long = "no-seed")]
    pub no_seed: bool,

    /// Print the environment variables pex reads and exit
    #[arg(long = "help-variables")]
    pub help_variables: bool,
}

/// Collapse a `--flag` / `--no-flag` pair into `Some(value)` when either was given
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            pypi: !self.no_pypi,
            indexes: self.indexes.clone(),
            find_links: self.find_links.clone(),
            pex_repository: self.pex_repository.clone(),
            resolver_version: self.resolver_version,
            network: NetworkConfiguration {
                retries: self.retries,
                timeout: self.timeout,
                proxy: self.proxy.clone(),
                cert: self.cert.clone(),
                client_cert: self.client_cert.clone(),
            },
            transitive: !self.intransitive,
            allow_prereleases: self.pre,
            allow_builds: !self.no_build,
            allow_wheels: !self.no_wheel,
            manylinux: self.manylinux.clone(),
            no_manylinux: self.no_manylinux,
            jobs: self.jobs,
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            venv: self.venv,
            venv_copies: self.venv_copies,
            include_tools: self.include_tools,
            pex_path: self.pex_path.clone(),
            ignore_errors: self.ignore_errors,
            emit_warnings: !self.no_emit_warnings,
            inherit_path: self.inherit_path.unwrap_or_default(),
            pex_root: self.runtime_pex_root.clone(),
            strip_pex_env: !self.no_strip_pex_env,
        }
    }

    pub fn deprecated_options(&self) -> DeprecatedOptions {
        DeprecatedOptions {
            zip_safe: flag_pair(self.zip_safe, self.not_zip_safe),
            unzip: flag_pair(self.unzip, self.no_unzip),
            always_write_cache: self.always_write_cache,
        }
    }

    /// Effective seed mode, honouring `--no-seed`
    pub fn seed_mode(&self) -> SeedMode {
        if self.no_seed {
            SeedMode::None
        } else {
            self.seed
        }
    }

    pub fn compile(&self) -> bool {
        self.compile && !self.no_compile
    }
}
