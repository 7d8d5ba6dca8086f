//! CLI command definitions and dispatch.

mod pull;
mod run;

use clap::{Parser, Subcommand};

/// skiff - run a command inside a Docker Hub image, chrooted and PID-isolated.
#[derive(Parser)]
#[command(name = "skiff", version, about)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "info", "skiff_runtime=debug")
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull an image into a fresh root and run a command inside it
    Run(run::RunArgs),
    /// Pull an image into a directory without running anything
    Pull(pull::PullArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Returns the exit code the process should terminate with.
pub async fn dispatch(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Pull(args) => pull::execute(args).await.map(|()| 0),
    }
}
