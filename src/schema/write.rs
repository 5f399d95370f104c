use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Hidden sibling used to stage `path` before it is renamed into place.
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `contents` to `path` so that readers see either the old file or the
/// complete new one, never a prefix.
///
/// - parent directories are created as needed
/// - the staging file lives next to `path` so the final rename stays on one filesystem
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = stage(path, contents)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::fs(path, e)
    })?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

/// Write `contents` to the staging path for `path` and return it.
pub fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }

    let tmp_path = staging_path(path);
    let mut tmp = fs::File::create(&tmp_path).map_err(|e| Error::fs(&tmp_path, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::fs(&tmp_path, e)
        })?;
    Ok(tmp_path)
}

/// Remove a staging file left behind by an aborted run.
pub fn clear_stale_staging(path: &Path) -> Result<bool> {
    let tmp_path = staging_path(path);
    match fs::remove_file(&tmp_path) {
        Ok(()) => {
            debug!(path = %tmp_path.display(), "removed stale staging file");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::fs(&tmp_path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_file_and_leaves_no_staging() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("DDL-ecs.sql");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn clears_stale_staging_once() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ecs.csv");
        fs::write(staging_path(&path), "partial").unwrap();
        assert!(clear_stale_staging(&path).unwrap());
        assert!(!clear_stale_staging(&path).unwrap());
    }

    #[test]
    fn unwritable_destination_is_a_filesystem_error() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // parent is a regular file, so the directory cannot be created
        let err = write_atomic(&blocker.join("out.sql"), b"sql").unwrap_err();
        assert!(matches!(err, Error::Filesystem { .. }));
    }
}
