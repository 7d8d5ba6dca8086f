//! Layer archive extraction.
//!
//! Archives are unpacked one at a time into the root directory and deleted
//! after their last use, so later layers overwrite earlier ones and an
//! archive never lands inside the final filesystem. Gzip and plain tar are
//! both accepted; OCI whiteout entries delete what lower layers created,
//! resolved through any symlinks those layers planted but never outside
//! the root.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use skiff_core::error::{Result, SkiffError};
use tar::Archive;

use super::fetch::layer_archive_path;
use super::manifest::Descriptor;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Extract every `*.tar` file directly inside `root_dir`, in file name order.
///
/// Returns the archives that were extracted (and removed).
pub fn extract_all(root_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(root_dir).map_err(|e| SkiffError::Extraction {
        archive: root_dir.to_path_buf(),
        message: format!("failed to scan root directory: {}", e),
    })?;

    let mut archives = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tar") {
            archives.push(path);
        }
    }
    archives.sort();

    extract_each(root_dir, &archives, |_| {})?;
    Ok(archives)
}

/// Extract `<root_dir>/<digest>.tar` for each layer, base layer first.
pub fn extract_layers(root_dir: &Path, layers: &[Descriptor]) -> Result<()> {
    let archives: Vec<PathBuf> = layers
        .iter()
        .map(|layer| layer_archive_path(root_dir, &layer.digest))
        .collect();
    extract_each(root_dir, &archives, |_| {})
}

/// Unpack each archive in turn, deleting it after its last occurrence in
/// `archives`; `on_done` runs after each unpack.
fn extract_each<F>(root_dir: &Path, archives: &[PathBuf], mut on_done: F) -> Result<()>
where
    F: FnMut(&Path),
{
    let last_use: HashMap<&Path, usize> = archives
        .iter()
        .enumerate()
        .map(|(i, archive)| (archive.as_path(), i))
        .collect();

    for (i, archive) in archives.iter().enumerate() {
        extract_archive(archive, root_dir)?;
        if last_use.get(archive.as_path()) == Some(&i) {
            fs::remove_file(archive).map_err(|e| SkiffError::Extraction {
                archive: archive.clone(),
                message: format!("failed to remove archive after extraction: {}", e),
            })?;
        }
        tracing::debug!(archive = %archive.display(), "Extracted layer");
        on_done(archive);
    }
    Ok(())
}

/// Unpack one archive (gzip or plain tar) into `target_dir`.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let extraction_err = |message: String| SkiffError::Extraction {
        archive: archive_path.to_path_buf(),
        message,
    };

    let file = File::open(archive_path).map_err(|e| extraction_err(format!("failed to open: {}", e)))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map_err(|e| extraction_err(format!("failed to read: {}", e)))?
        .starts_with(&GZIP_MAGIC);

    let unpacked = if is_gzip {
        unpack(Archive::new(GzDecoder::new(reader)), target_dir)
    } else {
        unpack(Archive::new(reader), target_dir)
    };
    unpacked.map_err(extraction_err)
}

fn unpack<R: Read>(mut archive: Archive<R>, target_dir: &Path) -> std::result::Result<(), String> {
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| format!("invalid archive: {}", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("invalid archive entry: {}", e))?;
        let entry_path = entry
            .path()
            .map_err(|e| format!("invalid entry path: {}", e))?
            .into_owned();

        if let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) {
            if name == OPAQUE_WHITEOUT {
                let dir = entry_path.parent().unwrap_or_else(|| Path::new(""));
                clear_directory(target_dir, dir)?;
                continue;
            }
            if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                let victim = entry_path.with_file_name(hidden);
                remove_whiteout_target(target_dir, &victim)?;
                continue;
            }
        }

        entry
            .unpack_in(target_dir)
            .map_err(|e| format!("failed to unpack {}: {}", entry_path.display(), e))?;
    }
    Ok(())
}

/// Join an archive-relative path under `root`, refusing anything but plain components.
fn contained_path(root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(joined)
}

/// Resolve `relative` under `root` following symlinks, refusing anything that
/// lands outside the root. `None` when the path does not exist.
fn resolve_in_root(root: &Path, relative: &Path) -> std::result::Result<Option<PathBuf>, String> {
    let Some(lexical) = contained_path(root, relative) else {
        return Err(format!("path escapes root: {}", relative.display()));
    };
    let canonical_root =
        fs::canonicalize(root).map_err(|e| format!("failed to resolve root: {}", e))?;
    match fs::canonicalize(&lexical) {
        Ok(resolved) if resolved.starts_with(&canonical_root) => Ok(Some(resolved)),
        Ok(resolved) => Err(format!(
            "{} resolves outside the root to {}",
            relative.display(),
            resolved.display()
        )),
        Err(_) => Ok(None),
    }
}

fn remove_whiteout_target(root: &Path, relative: &Path) -> std::result::Result<(), String> {
    let (Some(parent), Some(name)) = (relative.parent(), relative.file_name()) else {
        return Err(format!("invalid whiteout: {}", relative.display()));
    };
    let Some(dir) = resolve_in_root(root, parent)
        .map_err(|e| format!("whiteout {} rejected: {}", relative.display(), e))?
    else {
        return Ok(());
    };

    // The victim itself is never followed: a symlink is removed as a link.
    let target = dir.join(name);
    let removed = match fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target),
        Ok(_) => fs::remove_file(&target),
        Err(_) => return Ok(()),
    };
    removed.map_err(|e| format!("failed to apply whiteout {}: {}", relative.display(), e))
}

fn clear_directory(root: &Path, relative: &Path) -> std::result::Result<(), String> {
    let Some(dir) = resolve_in_root(root, relative)
        .map_err(|e| format!("opaque whiteout rejected: {}", e))?
    else {
        return Ok(());
    };
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| format!("failed to clear {}: {}", path.display(), e))?;
    }
    Ok(())
}
