// ABOUTME: Entry point for the deployer CLI application.
// ABOUTME: Loads configuration, builds the transport, and maps the outcome to an exit code.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use deployer::artifacts::{ArtifactEntry, ArtifactSource};
use deployer::config::{DeployerConfig, PARAM_TARGET_URL, unc};
use deployer::error::{Error, Result};
use deployer::output::{Output, OutputMode};
use deployer::runner::Runner;
use deployer::transport::{Outcome, RunContext, TransportKind};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    let code = match run(cli.command, mode).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_CONFIG
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands, mode: OutputMode) -> Result<i32> {
    match command {
        Commands::Deploy(args) => deploy(args, mode).await,
        Commands::Check(args) => check(args),
    }
}

async fn deploy(args: RunArgs, mode: OutputMode) -> Result<i32> {
    let runner = build_runner(&args)?;
    let transport = runner.build()?;

    let mut output = Output::new(mode);
    output.start_timer();
    let output = Arc::new(output);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Cancellation requested");
            on_signal.cancel();
        }
    });

    let ctx = RunContext::new(output.clone(), cancel);
    let kind = transport.kind();
    let outcome = transport.run(&ctx).await;

    output.finished(&format!("{} deployment {}", kind.label(), outcome));
    Ok(exit_code(&outcome))
}

fn check(args: RunArgs) -> Result<i32> {
    let runner = build_runner(&args)?;
    let kind = runner.transport_kind()?;

    if kind == TransportKind::Smb {
        let problems = unc::validate_properties(runner.params());
        if !problems.is_empty() {
            for problem in &problems {
                eprintln!("Invalid {}: {}", problem.name, problem.reason);
            }
            return Ok(EXIT_CONFIG);
        }
    }

    runner.build()?;
    println!(
        "Configuration OK: {} to [{}]",
        kind.label(),
        runner.params().get_or_empty(PARAM_TARGET_URL)
    );
    Ok(0)
}

fn build_runner(args: &RunArgs) -> Result<Runner> {
    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir()?,
    };

    let config = load_config(args.config.as_deref(), &working_dir)?;
    let mut params = config.runner_params()?;
    params.apply_overrides(args.params.iter().map(String::as_str))?;

    let artifacts = args
        .artifacts
        .iter()
        .map(|raw| ArtifactEntry::parse(raw).map(|entry| resolve_local(entry, &working_dir)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Runner::new(params, config.internal, ArtifactSource::new(artifacts)).working_dir(working_dir))
}

/// An explicit path must exist; otherwise look in the working directory and
/// fall back to parameters from the command line alone.
fn load_config(path: Option<&Path>, working_dir: &Path) -> Result<DeployerConfig> {
    match path {
        Some(path) if path.exists() => DeployerConfig::load(path),
        Some(path) => Err(Error::ConfigNotFound(path.to_path_buf())),
        None => match DeployerConfig::discover(working_dir) {
            Err(Error::ConfigNotFound(_)) => Ok(DeployerConfig::default()),
            other => other,
        },
    }
}

fn resolve_local(entry: ArtifactEntry, working_dir: &Path) -> ArtifactEntry {
    if entry.local_path().is_absolute() {
        entry
    } else {
        let local: PathBuf = working_dir.join(entry.local_path());
        ArtifactEntry::new(local, entry.remote_relative_path())
    }
}

fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Success | Outcome::SucceededWithProblems { .. } => 0,
        Outcome::Failed { .. } => EXIT_FAILED,
        Outcome::Interrupted => EXIT_INTERRUPTED,
    }
}
