// Recursive directory copy used by the etcd and manifests steps

use super::SnapshotError;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Map an error raised while reading `path` from a snapshot source.
pub(crate) fn source_error(path: &Path, err: io::Error) -> SnapshotError {
    match err.kind() {
        io::ErrorKind::NotFound => SnapshotError::PathNotFound {
            path: path.to_path_buf(),
        },
        io::ErrorKind::PermissionDenied => SnapshotError::PermissionDenied {
            path: path.to_path_buf(),
            source: err,
        },
        _ => SnapshotError::ReadError {
            path: path.to_path_buf(),
            source: err,
        },
    }
}

pub(crate) fn write_error(path: &Path, err: io::Error) -> SnapshotError {
    SnapshotError::WriteError {
        path: path.to_path_buf(),
        source: err,
    }
}

/// Remove whatever a previous run left at `path`. A missing path is fine.
pub(crate) fn clear_path(path: &Path) -> Result<(), SnapshotError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(write_error(path, e)),
    };

    debug!(path = %path.display(), "Removing previous snapshot output");
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| write_error(path, e))
}

/// Copy every directory and regular file under `src` into `dst`.
///
/// `dst` is created if needed. Symlinks and special files are skipped.
/// Returns the number of files copied.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<usize, SnapshotError> {
    let meta = fs::metadata(src).map_err(|e| source_error(src, e))?;
    if !meta.is_dir() {
        return Err(SnapshotError::PathNotFound {
            path: src.to_path_buf(),
        });
    }

    fs::create_dir_all(dst).map_err(|e| write_error(dst, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            source_error(&path, e.into())
        })?;

        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| write_error(&target, e))?;
        } else if file_type.is_file() {
            copy_file(entry.path(), &target)?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    Ok(copied)
}

fn copy_file(from: &Path, to: &Path) -> Result<(), SnapshotError> {
    let mut reader = File::open(from).map_err(|e| source_error(from, e))?;
    let permissions = reader
        .metadata()
        .map_err(|e| source_error(from, e))?
        .permissions();

    let mut writer = File::create(to).map_err(|e| write_error(to, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| write_error(to, e))?;
    fs::set_permissions(to, permissions).map_err(|e| write_error(to, e))?;
    Ok(())
}
