//! Filesystem and PID namespace isolation for the launched command.
//!
//! Isolation changes the root of the calling process, then unshares the PID
//! namespace so that the next child becomes PID 1 of a fresh namespace. The
//! PID namespace applies to children only, so the caller must spawn the
//! command from the same thread right after [`isolate`] returns.

use std::fs::File;
use std::path::Path;

use skiff_core::error::{IsolationStep, Result, SkiffError};

fn isolation_err(step: IsolationStep, message: impl ToString) -> SkiffError {
    SkiffError::Isolation {
        step,
        message: message.to_string(),
    }
}

/// Handle to the host's `/`, kept open across the chroot.
#[derive(Debug)]
pub struct HostRoot {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    handle: File,
}

/// chroot(root), unshare(CLONE_NEWPID), chdir("/"), in that order.
///
/// Each failure stops the sequence and reports the step that failed.
#[cfg(target_os = "linux")]
pub fn isolate(root: &Path) -> Result<HostRoot> {
    use nix::sched::{unshare, CloneFlags};
    use nix::unistd::{chdir, chroot};
    use std::os::unix::fs::OpenOptionsExt;

    let handle = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
        .open("/")
        .map_err(|e| isolation_err(IsolationStep::Chroot, format!("cannot open host root: {}", e)))?;

    chroot(root).map_err(|e| {
        isolation_err(IsolationStep::Chroot, format!("{}: {}", root.display(), e))
    })?;
    tracing::debug!(root = %root.display(), "Changed root");

    let host = HostRoot { handle };

    unshare(CloneFlags::CLONE_NEWPID).map_err(|e| isolation_err(IsolationStep::Unshare, e))?;
    chdir("/").map_err(|e| isolation_err(IsolationStep::Chdir, e))?;

    tracing::debug!("PID namespace created for children");
    Ok(host)
}

#[cfg(not(target_os = "linux"))]
pub fn isolate(root: &Path) -> Result<HostRoot> {
    Err(isolation_err(
        IsolationStep::Chroot,
        format!(
            "{}: chroot with PID namespaces is only supported on Linux",
            root.display()
        ),
    ))
}

impl HostRoot {
    /// Move the process back to the host root it had before [`isolate`].
    #[cfg(target_os = "linux")]
    pub fn escape(self) -> Result<()> {
        use nix::unistd::{chdir, chroot, fchdir};
        use std::os::unix::io::AsRawFd;

        fchdir(self.handle.as_raw_fd()).map_err(|e| isolation_err(IsolationStep::Restore, e))?;
        chroot(".").map_err(|e| isolation_err(IsolationStep::Restore, e))?;
        chdir("/").map_err(|e| isolation_err(IsolationStep::Restore, e))?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn escape(self) -> Result<()> {
        Ok(())
    }
}
