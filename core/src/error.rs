use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Step of the isolation sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationStep {
    /// Changing the filesystem root
    Chroot,
    /// Creating the PID namespace for children
    Unshare,
    /// Moving into `/` of the new root
    Chdir,
    /// Returning to the host root after the child exited
    Restore,
}

impl IsolationStep {
    /// Short name used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationStep::Chroot => "chroot",
            IsolationStep::Unshare => "unshare",
            IsolationStep::Chdir => "chdir",
            IsolationStep::Restore => "restore",
        }
    }
}

impl fmt::Display for IsolationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// skiff error types
#[derive(Error, Debug)]
pub enum SkiffError {
    /// Token endpoint unreachable, rejected the request, or sent garbage
    #[error("Authentication failed for {image}: {message}")]
    Auth { image: String, message: String },

    /// The image index has no entry for the target platform
    #[error("No manifest for platform {os}/{architecture} (available: {})", .available.join(", "))]
    NoMatchingPlatform {
        architecture: String,
        os: String,
        available: Vec<String>,
    },

    /// Manifest request failed or returned an undecodable body
    #[error("Manifest fetch failed for {image}:{reference}{}: {message}", status_suffix(.status))]
    ManifestFetch {
        image: String,
        reference: String,
        status: Option<u16>,
        message: String,
    },

    /// Layer blob transfer failed
    #[error("Blob download failed for {digest}: {message}")]
    BlobDownload { digest: String, message: String },

    /// Layer archive could not be unpacked
    #[error("Extraction failed for {}: {message}", .archive.display())]
    Extraction { archive: PathBuf, message: String },

    /// Ephemeral root directory could not be created
    #[error("Root creation failed under {}: {message}", .path.display())]
    RootCreation { path: PathBuf, message: String },

    /// Target executable could not be placed inside the root
    #[error("Executable injection failed for {}: {message}", .path.display())]
    Injection { path: PathBuf, message: String },

    /// One step of chroot / unshare / chdir failed
    #[error("Isolation failed at {step}: {message}")]
    Isolation { step: IsolationStep, message: String },

    /// Target command could not be started inside the root
    #[error("Exec failed for {command}: {message}")]
    Exec { command: String, message: String },

    /// Malformed image reference
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl From<serde_json::Error> for SkiffError {
    fn from(err: serde_json::Error) -> Self {
        SkiffError::SerializationError(err.to_string())
    }
}

/// Result type alias for skiff operations
pub type Result<T> = std::result::Result<T, SkiffError>;
