//! `skiff pull` command.

use std::path::PathBuf;

use clap::Args;
use skiff_core::config::{LaunchConfig, RegistryConfig};
use skiff_runtime::{ImagePuller, ImageReference, RegistryClient, RootDir};

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine:latest")
    pub image: String,

    /// Directory to extract into (created if missing); defaults to a fresh root that is kept
    #[arg(long)]
    pub dest: Option<PathBuf>,
}

pub async fn execute(args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = RegistryConfig::from_env()?;
    let reference = ImageReference::parse(&args.image)?;
    let puller = ImagePuller::new(RegistryClient::new(registry)?);

    let dest = match args.dest {
        Some(dest) => {
            std::fs::create_dir_all(&dest)?;
            puller.pull(&reference, &dest).await?;
            dest
        }
        None => {
            let launch_config = LaunchConfig::from_env()?;
            let root = RootDir::create(launch_config.root_base.as_deref())?;
            puller.pull(&reference, root.path()).await?;
            root.keep()
        }
    };

    println!("{}", dest.display());
    Ok(())
}
