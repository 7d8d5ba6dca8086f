//! `skiff run` command: pull, inject, isolate, launch.

use std::path::PathBuf;

use clap::Args;
use skiff_core::config::{LaunchConfig, RegistryConfig};
use skiff_runtime::{exit_code, launch, ImagePuller, ImageReference, RegistryClient, RootDir};

#[derive(Args)]
pub struct RunArgs {
    /// Image reference (e.g., "alpine", "ubuntu:22.04")
    pub image: String,

    /// Host executable to run inside the image
    pub command: PathBuf,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub async fn execute(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let registry = RegistryConfig::from_env()?;
    let launch_config = LaunchConfig::from_env()?;
    let reference = ImageReference::parse(&args.image)?;

    let root = RootDir::create(launch_config.root_base.as_deref())?;
    let puller = ImagePuller::new(RegistryClient::new(registry)?);
    puller.pull(&reference, root.path()).await?;

    let command = root.inject_executable(&args.command)?;

    let root_path = root.path().to_path_buf();
    let status = tokio::task::spawn_blocking(move || launch(&root_path, &command, &args.args))
        .await??;
    let code = exit_code(&status);

    if launch_config.keep_root {
        let kept = root.keep();
        tracing::info!(root = %kept.display(), "Keeping root directory");
    }

    Ok(code)
}
