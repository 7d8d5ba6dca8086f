//! Hand-off: isolate, run the target command, report its exit status.

use std::path::Path;
use std::process::{Command, ExitStatus};

use skiff_core::error::{Result, SkiffError};

use crate::namespace::isolate;

/// Exit code of the launcher itself when the pipeline or isolation fails.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 125;

/// Isolate into `root` and run `command` there with inherited stdio.
///
/// Blocking. Isolation and the spawn happen on the calling thread, which is
/// required for the child to land in the new PID namespace. The process is
/// moved back to the host root before returning so the caller can remove
/// `root`.
pub fn launch(root: &Path, command: &Path, args: &[String]) -> Result<ExitStatus> {
    let host = isolate(root)?;

    tracing::info!(command = %command.display(), args = ?args, "Launching command");
    let status = Command::new(command)
        .args(args)
        .status()
        .map_err(|e| SkiffError::Exec {
            command: command.display().to_string(),
            message: e.to_string(),
        });

    if let Err(e) = host.escape() {
        tracing::warn!(error = %e, "Failed to return to host root");
    }

    let status = status?;
    tracing::debug!(status = %status, "Command exited");
    Ok(status)
}

/// Launcher exit code for a finished child: its code, or 128 + signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
