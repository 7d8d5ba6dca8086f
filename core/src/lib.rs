//! skiff core - foundational types shared by the runtime and the CLI.
//!
//! Holds the error taxonomy used by every stage of a pull or launch and the
//! environment-driven configuration for the registry client and the launcher.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{LaunchConfig, RegistryConfig};
pub use error::{IsolationStep, Result, SkiffError};

/// skiff version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
