//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / parent-directory checks.

use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all(parent).await
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_error("checking", path, e))
}

/// Move a file, falling back to copy + remove when `rename` cannot cross
/// filesystems (temp dir on local disk, archive on a network mount).
///
/// A missing source with the destination in place counts as already moved.
pub async fn move_file(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_dir(dst).await?;
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if exists(dst).await? {
                debug!(src = %src.display(), dst = %dst.display(), "Already moved");
                Ok(())
            } else {
                Err(io_error("moving", src, e))
            }
        }
        Err(e) => {
            debug!(src = %src.display(), dst = %dst.display(), error = %e, "rename failed, copying");
            tokio::fs::copy(src, dst)
                .await
                .map_err(|e| io_error("copying", src, e))?;
            tokio::fs::remove_file(src)
                .await
                .map_err(|e| io_error("removing", src, e))
        }
    }
}

/// Move a directory tree (HLS output) with the same fallback as [`move_file`].
pub async fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_dir(dst).await?;
    if !exists(src).await? && exists(dst).await? {
        debug!(src = %src.display(), dst = %dst.display(), "Already moved");
        return Ok(());
    }
    if tokio::fs::rename(src, dst).await.is_ok() {
        return Ok(());
    }

    ensure_dir_all(dst).await?;
    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| io_error("reading directory", src, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading directory", src, e))?
    {
        let target = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| io_error("reading file type", &entry.path(), e))?;
        if file_type.is_dir() {
            Box::pin(move_dir(&entry.path(), &target)).await?;
        } else {
            move_file(&entry.path(), &target).await?;
        }
    }
    tokio::fs::remove_dir_all(src)
        .await
        .map_err(|e| io_error("removing directory", src, e))
}

/// Remove a file if it exists. Missing files are not an error.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing", path, e)),
    }
}
