//! Build orchestration
//!
//! [`build_pex`] drives one build from start to a frozen workspace:
//!
//! 1. reject conflicting entry point options and warn about deprecated ones
//! 2. select interpreters and match platforms into a [`BuildPlan`]
//! 3. copy source directories into a fresh [`Workspace`]
//! 4. resolve distributions exactly once through the configured [`Resolver`]
//! 5. record distributions, direct requirements and metadata, then freeze
//!
//! Emitting the frozen workspace (write it out, seed it or run it) is left to
//! the caller.

mod pex_info;
mod plan;
mod workspace;
mod writer;

pub use pex_info::{BinPath, BuildProperties, DistributionInfo, InheritPath, PexInfo, PEX_INFO_PATH};
pub use plan::BuildPlan;
pub use workspace::Workspace;
pub use writer::{render_main, write_loose, DEPS_DIR, MAIN};

use crate::error::{PexError, PexResult};
use crate::interpreter::{Interpreter, InterpreterProbe, InterpreterSelection, SearchPath};
use crate::platform::PlatformTarget;
use crate::resolve::{ResolveConfiguration, ResolveRequest, Resolver};
use crate::ui::{TaskSpinner, UiContext};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

/// Options that no longer change the build and only produce a warning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeprecatedOptions {
    /// `--zip-safe` / `--not-zip-safe`
    pub zip_safe: Option<bool>,
    /// `--unzip` / `--no-unzip`
    pub unzip: Option<bool>,
    /// `--always-write-cache`
    pub always_write_cache: bool,
}

impl DeprecatedOptions {
    /// One warning per deprecated option that was set
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.zip_safe.is_some() {
            warnings.push(
                "The `--zip-safe/--not-zip-safe` option is deprecated. This option is no longer \
                 used since user code is now always unzipped before execution.",
            );
        }
        if self.unzip.is_some() {
            warnings.push(
                "The `--unzip/--no-unzip` option is deprecated. This option is no longer used \
                 since unzipping PEX zip files before execution is now the default.",
            );
        }
        if self.always_write_cache {
            warnings.push(
                "The `--always-write-cache` option is deprecated. This option is no longer used; \
                 all internally cached distributions in a PEX are always installed into the \
                 local Pex dependency cache.",
            );
        }
        warnings
    }
}

/// Runtime behaviour recorded in `PEX-INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// `--venv`, with where the venv `bin` dir goes on `PATH`
    pub venv: Option<BinPath>,
    pub venv_copies: bool,
    pub include_tools: bool,
    pub pex_path: Option<String>,
    pub ignore_errors: bool,
    pub emit_warnings: bool,
    pub inherit_path: InheritPath,
    /// `--runtime-pex-root`
    pub pex_root: Option<String>,
    pub strip_pex_env: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            venv: None,
            venv_copies: false,
            include_tools: false,
            pex_path: None,
            ignore_errors: false,
            emit_warnings: true,
            inherit_path: InheritPath::False,
            pex_root: None,
            strip_pex_env: true,
        }
    }
}

impl RuntimeOptions {
    fn apply(&self, info: &mut PexInfo) {
        info.venv = self.venv.is_some();
        info.venv_bin_path = self.venv.unwrap_or(BinPath::False);
        info.venv_copies = self.venv_copies;
        info.includes_tools = self.include_tools || self.venv.is_some();
        info.pex_path = self.pex_path.clone();
        info.ignore_errors = self.ignore_errors;
        info.emit_warnings = self.emit_warnings;
        info.inherit_path = self.inherit_path;
        info.pex_root = self.pex_root.clone();
        info.strip_pex_env = self.strip_pex_env;
    }
}

/// Everything one build needs, resolved from the command line and
/// environment before the build starts
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub requirements: Vec<String>,
    pub requirement_files: Vec<PathBuf>,
    pub constraint_files: Vec<PathBuf>,
    pub requirements_pexes: Vec<PathBuf>,

    /// `--python`
    pub pythons: Vec<String>,
    /// `--interpreter-constraint`
    pub interpreter_constraints: Vec<String>,
    pub search_path: SearchPath,
    pub platforms: Vec<PlatformTarget>,
    pub resolve_local_platforms: bool,
    pub resolve_configuration: ResolveConfiguration,

    /// `-D`, in declaration order
    pub sources_directories: Vec<PathBuf>,
    /// `-R`, merged after the `-D` directories
    pub resources_directories: Vec<PathBuf>,

    pub entry_point: Option<String>,
    pub script: Option<String>,
    pub preamble_file: Option<PathBuf>,
    pub python_shebang: Option<String>,

    pub runtime: RuntimeOptions,
    pub deprecated: DeprecatedOptions,
    pub compile: bool,

    /// Parent of the workspace and resolver scratch space
    pub tmpdir: PathBuf,
    /// Download cache for the resolver, `None` to disable
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            requirements: Vec::new(),
            requirement_files: Vec::new(),
            constraint_files: Vec::new(),
            requirements_pexes: Vec::new(),
            pythons: Vec::new(),
            interpreter_constraints: Vec::new(),
            search_path: SearchPath::parse(""),
            platforms: Vec::new(),
            resolve_local_platforms: false,
            resolve_configuration: ResolveConfiguration::default(),
            sources_directories: Vec::new(),
            resources_directories: Vec::new(),
            entry_point: None,
            script: None,
            preamble_file: None,
            python_shebang: None,
            runtime: RuntimeOptions::default(),
            deprecated: DeprecatedOptions::default(),
            compile: false,
            tmpdir: std::env::temp_dir(),
            cache_dir: None,
        }
    }
}

impl BuildOptions {
    /// Source directories in copy order: `-D` then `-R`, de-duplicated.
    pub fn source_directories(&self) -> Vec<PathBuf> {
        let mut directories: Vec<PathBuf> = Vec::new();
        for directory in self
            .sources_directories
            .iter()
            .chain(&self.resources_directories)
        {
            if !directories.contains(directory) {
                directories.push(directory.clone());
            }
        }
        directories
    }
}

/// A frozen workspace and the plan it was built for
#[derive(Debug)]
pub struct BuiltPex {
    pub workspace: Workspace,
    pub plan: BuildPlan,
}

impl BuiltPex {
    /// Interpreter to run or validate the PEX with
    pub fn interpreter(&self) -> Option<&Interpreter> {
        self.plan.interpreter.as_ref()
    }
}

/// Reject mutually exclusive options and malformed interpreter constraints.
///
/// Touches neither the filesystem nor any interpreter.
pub fn validate_options(
    entry_point: Option<&str>,
    script: Option<&str>,
    pythons: &[String],
    interpreter_constraints: &[String],
) -> PexResult<InterpreterSelection> {
    if entry_point.is_some() && script.is_some() {
        return Err(PexError::ConfigConflict(
            "Must specify at most one entry point or script.".to_string(),
        ));
    }
    InterpreterSelection::new(pythons, interpreter_constraints)
}

/// Build a frozen workspace from `options`.
pub async fn build_pex(
    options: &BuildOptions,
    probe: &dyn InterpreterProbe,
    resolver: &dyn Resolver,
    ui: &UiContext,
) -> PexResult<BuiltPex> {
    let selection = validate_options(
        options.entry_point.as_deref(),
        options.script.as_deref(),
        &options.pythons,
        &options.interpreter_constraints,
    )?;

    if !options.resources_directories.is_empty() {
        warn!(
            "The `-R/--resources-directory` option is deprecated. Resources should be added via \
             `-D/--sources-directory` instead."
        );
    }
    for warning in options.deprecated.warnings() {
        warn!("{}", warning);
    }

    let plan = BuildPlan::create(
        &selection,
        &options.platforms,
        options.resolve_local_platforms,
        &options.search_path,
        probe,
        options.resolve_configuration.clone(),
    )
    .await?;

    let preamble = match &options.preamble_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .map_err(|e| PexError::io(format!("reading preamble {}", path.display()), e))?,
        ),
        None => None,
    };

    let mut workspace = Workspace::new(&options.tmpdir, plan.interpreter.clone(), preamble)?;
    for directory in options.source_directories() {
        workspace.add_source_directory(&directory)?;
    }

    options.runtime.apply(workspace.info_mut()?);
    for constraint in selection.constraints() {
        workspace.add_interpreter_constraint(&constraint)?;
    }
    for requirements_pex in &options.requirements_pexes {
        workspace.add_from_requirements_pex(requirements_pex)?;
    }

    resolve_into(options, &plan, resolver, &mut workspace, ui).await?;

    if let Some(entry_point) = &options.entry_point {
        workspace.set_entry_point(entry_point)?;
    } else if let Some(script) = &options.script {
        workspace.set_script(script)?;
    }
    if let Some(shebang) = &options.python_shebang {
        workspace.set_shebang(shebang)?;
    }

    workspace.freeze(options.compile).await?;
    Ok(BuiltPex { workspace, plan })
}

/// Resolve once and record the result in the workspace.
async fn resolve_into(
    options: &BuildOptions,
    plan: &BuildPlan,
    resolver: &dyn Resolver,
    workspace: &mut Workspace,
    ui: &UiContext,
) -> PexResult<()> {
    let work_dir = tempfile::Builder::new()
        .prefix("pex-resolve.")
        .tempdir_in(&options.tmpdir)
        .map_err(|e| PexError::io(format!("creating resolve dir in {}", options.tmpdir.display()), e))?;

    let request = ResolveRequest {
        requirements: options.requirements.clone(),
        requirement_files: options.requirement_files.clone(),
        constraint_files: options.constraint_files.clone(),
        targets: plan.targets.clone(),
        runner: plan.interpreter.clone(),
        work_dir: work_dir.path().to_path_buf(),
        cache_dir: options.cache_dir.clone(),
        compile: options.compile,
        ignore_errors: options.runtime.ignore_errors,
    };
    if request.is_empty() {
        debug!("No requirements given; skipping resolve");
        return Ok(());
    }

    let mut listing = options.requirements.clone();
    listing.extend(options.requirement_files.iter().map(|f| f.display().to_string()));
    let mut spinner = TaskSpinner::new(ui);
    spinner.start(&format!("Resolving distributions ({})", listing.join(", ")));

    let result = match resolver
        .resolve(&request)
        .instrument(info_span!("resolve", resolver = resolver.name()))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            spinner.clear();
            return Err(e);
        }
    };

    for installed in &result.installed_distributions {
        workspace.add_distribution(&installed.distribution)?;
        if let Some(requirement) = &installed.direct_requirement {
            workspace.add_requirement(requirement)?;
        }
    }
    spinner.stop(&format!(
        "Resolved {} distribution(s)",
        workspace.info().distributions.len()
    ));
    Ok(())
}

/// Import the entry point of a frozen PEX in a child interpreter.
pub async fn validate_entry_point(pex: &Path, interpreter: &Interpreter) -> PexResult<()> {
    let info = PexInfo::load(pex)?;
    let Some(entry_point) = info.entry_point else {
        return Ok(());
    };
    debug!("Validating entry point {}", entry_point);

    let output = Command::new(interpreter.binary())
        .arg(pex.join(MAIN))
        .env("__PEX_VALIDATE_ENTRY_POINT", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PexError::command_failed(interpreter.binary().display().to_string(), e))?;

    if !output.status.success() {
        return Err(PexError::EntryPointInvalid {
            entry_point,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Whether `interpreter` can run a PEX built for `platforms`.
pub fn compatible_with_platforms(interpreter: &Interpreter, platforms: &[PlatformTarget]) -> bool {
    platforms.is_empty()
        || platforms.iter().any(|target| match target {
            PlatformTarget::Current => true,
            PlatformTarget::Tag(platform) => interpreter.supports(platform),
        })
}

/// Run a loose PEX with `interpreter`, passing `args` through.
///
/// `env` entries are added to the child environment.
pub async fn run_pex(
    pex: &Path,
    interpreter: &Interpreter,
    args: &[String],
    env: &[(String, String)],
) -> PexResult<ExitStatus> {
    info!("Running PEX file at {} with args {:?}", pex.display(), args);
    let command = format!("{} {}", interpreter.binary().display(), pex.display());
    let mut child = Command::new(interpreter.binary())
        .arg(pex.join(MAIN))
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .spawn()
        .map_err(|e| PexError::command_failed(command.clone(), e))?;
    child
        .wait()
        .await
        .map_err(|e| PexError::command_failed(command, e))
}
