//! pex - build executable Python environments
//!
//! CLI entry point.

use clap::Parser;
use console::style;
use pex::cli::Cli;
use pex::config::Variables;
use pex::error::PexResult;
use pex::ui::UiContext;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> PexResult<u8> {
    let cli = Cli::parse();
    let vars = Variables::load(cli.rcfile.as_deref()).await?;

    // 0 = warn (spinners only), 1 = info, 2 = debug, 3+ = trace
    let verbosity = cli.verbose.max(vars.verbosity());
    let filter = match verbosity {
        0 => EnvFilter::new("pex=warn"),
        1 => EnvFilter::new("pex=info"),
        2 => EnvFilter::new("pex=debug"),
        _ => EnvFilter::new("pex=trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let ui = UiContext::detect().quiet(verbosity > 0);
    pex::cli::execute(cli, vars, ui).await
}
