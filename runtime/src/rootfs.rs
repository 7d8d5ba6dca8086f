//! Ephemeral root directory and executable injection.
//!
//! A [`RootDir`] owns a fresh `skiff-XXXXXX` directory that the image layers
//! are extracted into. The target executable is then mirrored into it at the
//! same absolute path it has on the host, so the command name works unchanged
//! once the process is chrooted.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;

/// Prefix of every ephemeral root directory.
pub const ROOT_DIR_PREFIX: &str = "skiff-";

/// Guard for an ephemeral root directory; removes it on drop.
#[derive(Debug)]
pub struct RootDir {
    dir: Option<TempDir>,
}

impl RootDir {
    /// Create a unique root under `base`, or under the system temp dir.
    pub fn create(base: Option<&Path>) -> Result<Self> {
        let base = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix(ROOT_DIR_PREFIX)
            .tempdir_in(&base)
            .map_err(|e| SkiffError::RootCreation {
                path: base.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(root = %dir.path().display(), "Created root directory");
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Mirror `executable` into this root; see [`inject_executable`].
    pub fn inject_executable(&self, executable: &Path) -> Result<PathBuf> {
        inject_executable(self.path(), executable)
    }

    /// Stop managing the directory and return its path; it is left on disk.
    pub fn keep(mut self) -> PathBuf {
        match self.dir.take() {
            Some(dir) => dir.keep(),
            None => PathBuf::new(),
        }
    }
}

impl Drop for RootDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(root = %path.display(), error = %e, "Failed to remove root directory");
            }
        }
    }
}

/// Place `executable` inside `root` at the path it has on the host.
///
/// Relative paths are resolved against the current directory. The binary is
/// hard linked (after resolving symlinks); across filesystems it is copied
/// instead. An existing file at the destination is replaced. Symlinks the
/// image placed along the destination path are followed only while they stay
/// inside `root`. Returns the absolute path of the executable as seen from
/// inside the root.
pub fn inject_executable(root: &Path, executable: &Path) -> Result<PathBuf> {
    let injection_err = |message: String| SkiffError::Injection {
        path: executable.to_path_buf(),
        message,
    };

    let absolute = if executable.is_absolute() {
        executable.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| injection_err(format!("cannot resolve current directory: {}", e)))?
            .join(executable)
    };
    let in_root = normalize(&absolute)
        .ok_or_else(|| injection_err("path does not name a file".to_string()))?;

    let source = fs::canonicalize(&absolute)
        .map_err(|e| injection_err(format!("cannot resolve executable: {}", e)))?;
    if !source.is_file() {
        return Err(injection_err("not a regular file".to_string()));
    }

    let relative = in_root.strip_prefix("/").unwrap_or(&in_root);
    let (Some(parent), Some(file_name)) = (relative.parent(), relative.file_name()) else {
        return Err(injection_err("path does not name a file".to_string()));
    };
    let dest = create_parent_in_root(root, parent)
        .map_err(injection_err)?
        .join(file_name);

    match fs::symlink_metadata(&dest) {
        Ok(meta) if meta.is_dir() => {
            return Err(injection_err(format!(
                "{} is a directory in the image",
                in_root.display()
            )));
        }
        Ok(_) => fs::remove_file(&dest).map_err(|e| {
            injection_err(format!("failed to replace {}: {}", dest.display(), e))
        })?,
        Err(_) => {}
    }

    match fs::hard_link(&source, &dest) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                src = %source.display(),
                dest = %dest.display(),
                "Root is on another filesystem, copying executable"
            );
            fs::copy(&source, &dest)
                .map_err(|e| injection_err(format!("failed to copy: {}", e)))?;
        }
        Err(e) => return Err(injection_err(format!("failed to link: {}", e))),
    }

    tracing::debug!(executable = %in_root.display(), root = %root.display(), "Injected executable");
    Ok(in_root)
}

/// Create `relative` under `root` one component at a time, following symlinks
/// only when they resolve inside `root`. Returns the resolved directory.
fn create_parent_in_root(root: &Path, relative: &Path) -> std::result::Result<PathBuf, String> {
    let canonical_root =
        fs::canonicalize(root).map_err(|e| format!("cannot resolve root: {}", e))?;
    let mut current = canonical_root.clone();

    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(format!("unexpected component in {}", relative.display()));
        };
        let next = current.join(part);
        match fs::symlink_metadata(&next) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let resolved = fs::canonicalize(&next)
                    .map_err(|e| format!("cannot resolve {}: {}", next.display(), e))?;
                if !resolved.starts_with(&canonical_root) || !resolved.is_dir() {
                    return Err(format!(
                        "{} points outside the root or not to a directory",
                        next.display()
                    ));
                }
                current = resolved;
            }
            Ok(meta) if meta.is_dir() => current = next,
            Ok(_) => return Err(format!("{} is not a directory", next.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&next)
                    .map_err(|e| format!("failed to create {}: {}", next.display(), e))?;
                current = next;
            }
            Err(e) => return Err(format!("cannot inspect {}: {}", next.display(), e)),
        }
    }
    Ok(current)
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

/// Lexically normalize an absolute path, dropping `.` and resolving `..`.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                normalized.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    (normalized != Path::new("/")).then_some(normalized)
}
