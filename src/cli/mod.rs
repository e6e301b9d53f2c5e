//! Command-line driver
//!
//! Turns parsed arguments plus environment [`Variables`] into
//! [`BuildOptions`], builds, then writes, seeds or runs the result.

mod args;

pub use args::Cli;

use crate::build::{
    build_pex, compatible_with_platforms, run_pex, validate_entry_point, validate_options,
    write_loose, BuildOptions, BuiltPex,
};
use crate::config::{render_variables_help, Variables};
use crate::error::{PexError, PexResult};
use crate::interpreter::{Interpreter, InterpreterProbe, SearchPath, SubprocessProbe};
use crate::resolve::{resolver_for, ResolveConfiguration};
use crate::seed::{seed_cache, SeedMode};
use crate::ui::UiContext;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info_span, warn, Instrument};

/// Directory for the resolver's download cache inside the pex root
const PIP_CACHE_DIR: &str = "pip_cache";

/// Pex root for this invocation; a throwaway one keeps its directory alive
#[derive(Debug)]
pub enum PexRoot {
    Shared(PathBuf),
    Disabled(TempDir),
}

impl PexRoot {
    pub fn path(&self) -> &Path {
        match self {
            Self::Shared(path) => path,
            Self::Disabled(dir) => dir.path(),
        }
    }
}

/// Check `--tmpdir` and return its canonical form.
pub fn check_tmpdir(tmpdir: &Path) -> PexResult<PathBuf> {
    if !tmpdir.exists() {
        return Err(PexError::TmpDirMissing(tmpdir.to_path_buf()));
    }
    if !tmpdir.is_dir() {
        return Err(PexError::TmpDirNotDirectory(tmpdir.to_path_buf()));
    }
    tmpdir
        .canonicalize()
        .map_err(|e| PexError::io(format!("resolving {}", tmpdir.display()), e))
}

/// Pick the pex root from `--pex-root`, `--cache-dir`, `--disable-cache`
/// and `PEX_ROOT`.
pub fn select_pex_root(cli: &Cli, vars: &Variables, tmpdir: &Path) -> PexResult<PexRoot> {
    if let Some(cache_dir) = &cli.cache_dir {
        warn!("The --cache-dir option is deprecated, use --pex-root instead.");
        if cli.pex_root.as_ref().is_some_and(|root| root != cache_dir) {
            return Err(PexError::ConfigConflict(
                "Both --cache-dir and --pex-root were passed with conflicting values. Just set --pex-root."
                    .to_string(),
            ));
        }
    }

    if cli.disable_cache {
        let set_via = if cli.cache_dir.is_some() {
            Some("--cache-dir")
        } else if cli.pex_root.is_some() {
            Some("--pex-root")
        } else if vars.pex_root_override().is_some() {
            Some("PEX_ROOT")
        } else {
            None
        };
        if let Some(via) = set_via {
            warn!(
                "The pex root has been set via {via} but --disable-cache is also set. \
                 Ignoring {via} and disabling caches."
            );
        }
        let dir = tempfile::Builder::new()
            .prefix("pex-root.")
            .tempdir_in(tmpdir)
            .map_err(|e| PexError::io(format!("creating pex root in {}", tmpdir.display()), e))?;
        return Ok(PexRoot::Disabled(dir));
    }

    Ok(PexRoot::Shared(
        cli.cache_dir
            .clone()
            .or_else(|| cli.pex_root.clone())
            .unwrap_or_else(|| vars.pex_root()),
    ))
}

/// Translate arguments into build options.
pub fn build_options(
    cli: &Cli,
    vars: &Variables,
    resolve_configuration: ResolveConfiguration,
    tmpdir: PathBuf,
    pex_root: &Path,
) -> BuildOptions {
    let python_path = cli.python_path.as_deref().or_else(|| vars.python_path());
    BuildOptions {
        requirements: cli.requirements.clone(),
        requirement_files: cli.requirement_files.clone(),
        constraint_files: cli.constraint_files.clone(),
        requirements_pexes: cli.requirements_pexes.clone(),
        pythons: cli.python.clone(),
        interpreter_constraints: cli.interpreter_constraint.clone(),
        search_path: SearchPath::from_config(python_path, vars.path()),
        platforms: cli.platforms.clone(),
        resolve_local_platforms: cli.resolve_local_platforms,
        resolve_configuration,
        sources_directories: cli.sources_directory.clone(),
        resources_directories: cli.resources_directory.clone(),
        entry_point: cli.entry_point.clone(),
        script: cli.script.clone(),
        preamble_file: cli.preamble_file.clone(),
        python_shebang: cli.python_shebang.clone(),
        runtime: cli.runtime_options(),
        deprecated: cli.deprecated_options(),
        compile: cli.compile(),
        tmpdir,
        cache_dir: Some(pex_root.join(PIP_CACHE_DIR)),
    }
}

/// Run one invocation and return the process exit status.
pub async fn execute(cli: Cli, vars: Variables, ui: UiContext) -> PexResult<u8> {
    if cli.help_variables {
        print!("{}", render_variables_help());
        return Ok(0);
    }
    validate_options(
        cli.entry_point.as_deref(),
        cli.script.as_deref(),
        &cli.python,
        &cli.interpreter_constraint,
    )?;

    let tmpdir = check_tmpdir(&cli.tmpdir.clone().unwrap_or_else(|| vars.tmpdir()))?;
    let pex_root = select_pex_root(&cli, &vars, &tmpdir)?;
    debug!("Using pex root {}", pex_root.path().display());

    if cli.no_seed {
        warn!("The --no-seed option is deprecated, use --seed=none instead.");
    }
    let seed = cli.seed_mode();

    let resolve_configuration = ResolveConfiguration::create(&cli.resolve_options())?;
    let options = build_options(
        &cli,
        &vars,
        resolve_configuration.clone(),
        tmpdir.clone(),
        pex_root.path(),
    );

    let probe = SubprocessProbe::new();
    let resolver = resolver_for(&resolve_configuration);
    let built = build_pex(&options, &probe, resolver.as_ref(), &ui)
        .instrument(info_span!("build"))
        .await?;

    if cli.validate_entry_point {
        let interpreter = runtime_interpreter(&built, &probe).await?;
        validate_entry_point(built.workspace.path(), &interpreter).await?;
    }

    match &cli.output_file {
        Some(output) => {
            write_loose(built.workspace.path(), output)?;
            if seed != SeedMode::None {
                let interpreter = runtime_interpreter(&built, &probe).await?;
                if let Some(report) = seed_cache(output, pex_root.path(), &interpreter, seed).await? {
                    println!("{}", report);
                }
            }
            Ok(0)
        }
        None => {
            if seed != SeedMode::None {
                warn!("--seed has no effect without -o/--output-file; running the PEX instead.");
            }
            let interpreter = runtime_interpreter(&built, &probe).await?;
            if !compatible_with_platforms(&interpreter, &cli.platforms) {
                warn!(
                    "Attempting to run PEX with incompatible platforms! Running on platform {} but built for {}",
                    interpreter
                        .platform()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown".to_string()),
                    cli.platforms
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            let env = vec![
                ("TMPDIR".to_string(), tmpdir.display().to_string()),
                ("PEX_ROOT".to_string(), pex_root.path().display().to_string()),
            ];
            let status = run_pex(built.workspace.path(), &interpreter, &cli.passthrough, &env).await?;
            Ok(status
                .code()
                .and_then(|code| u8::try_from(code).ok())
                .unwrap_or(1))
        }
    }
}

/// The primary interpreter, or the current one for binary-only builds
async fn runtime_interpreter(built: &BuiltPex, probe: &dyn InterpreterProbe) -> PexResult<Interpreter> {
    match built.interpreter() {
        Some(interpreter) => Ok(interpreter.clone()),
        None => probe.current().await,
    }
}
