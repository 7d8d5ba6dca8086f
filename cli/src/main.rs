//! skiff CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skiff_cli::commands::{dispatch, Cli};
use skiff_runtime::LAUNCH_FAILURE_EXIT_CODE;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so the command's stdout stays untouched
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(LAUNCH_FAILURE_EXIT_CODE);
        }
    }
}
