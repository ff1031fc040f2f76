// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the deploy and check subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Deploy build artifacts over SSH, SCP, SFTP, FTP or SMB")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print warnings, errors and the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print progress as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured transport
    Deploy(RunArgs),

    /// Validate the configuration without connecting
    Check(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Configuration file (default: deployer.yml in the working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override a runner parameter, e.g. -p deployer.targetUrl=host/dir
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Artifact to upload as LOCAL[=REMOTE]
    #[arg(short, long = "artifact", value_name = "LOCAL[=REMOTE]")]
    pub artifacts: Vec<String>,

    /// Working directory for relative key and artifact paths
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,
}
