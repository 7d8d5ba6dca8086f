//! skiff runtime: registry pipeline, ephemeral root, isolation and launch.

#![allow(clippy::result_large_err)]

pub mod launch;
pub mod namespace;
pub mod oci;
pub mod rootfs;

// Re-export common types
pub use launch::{exit_code, launch, LAUNCH_FAILURE_EXIT_CODE};
pub use namespace::{isolate, HostRoot};
pub use oci::{Descriptor, ImagePuller, ImageReference, Platform, PullReport, RegistryClient};
pub use rootfs::{inject_executable, RootDir};

/// skiff runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
