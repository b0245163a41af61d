//! Restore helpers: archive path validation and the on-disk file swap
//!
//! The swap runs while the live connection is closed. It removes the WAL and
//! shared-memory sidecars so stale pages cannot shadow the restored file,
//! replaces the database with a rename, and clears the sidecars again. A failed
//! step is returned as-is; nothing already done is rolled back.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::database::{DatabaseError, Result};

/// Suffix of the file an archive is extracted into before the swap
const STAGING_SUFFIX: &str = ".restore_tmp";

/// SQLite sidecar suffixes that must not survive a restore
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Temporary file beside the live database that receives the archive entry
pub fn staging_path(db_path: &Path) -> PathBuf {
    with_suffix(db_path, STAGING_SUFFIX)
}

pub fn sidecar_paths(db_path: &Path) -> Vec<PathBuf> {
    SIDECAR_SUFFIXES
        .iter()
        .map(|suffix| with_suffix(db_path, suffix))
        .collect()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_sidecars(db_path: &Path) -> io::Result<()> {
    for sidecar in sidecar_paths(db_path) {
        remove_if_exists(&sidecar)?;
    }
    Ok(())
}

/// Replace the database file with the staged copy
pub fn swap_into_place(staging: &Path, db_path: &Path) -> Result<()> {
    remove_sidecars(db_path)?;
    remove_if_exists(db_path)?;
    fs::rename(staging, db_path)?;
    remove_sidecars(db_path)?;
    Ok(())
}

/// Canonicalize `path`, or the nearest existing ancestor when it is missing
fn canonical_or_lexical(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let absolute = std::path::absolute(path)?;
            match (absolute.parent(), absolute.file_name()) {
                (Some(parent), Some(name)) => Ok(canonical_or_lexical(parent)?.join(name)),
                _ => Ok(absolute),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve an operator-supplied archive reference to a file inside `backup_dir`.
///
/// `requested` may be a bare file name, a path as returned by the backup
/// listing, or an absolute path. Anything that resolves outside the backup
/// directory is rejected before the filesystem is touched.
pub fn resolve_archive_path(backup_dir: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested.trim().is_empty() {
        return Err(DatabaseError::BackupNotFound);
    }
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(DatabaseError::PathTraversal(requested.to_string()));
    }

    let candidate = if requested_path.is_absolute() || requested_path.starts_with(backup_dir) {
        requested_path.to_path_buf()
    } else {
        backup_dir.join(requested_path)
    };

    let root = canonical_or_lexical(backup_dir)?;
    let resolved = canonical_or_lexical(&candidate)?;
    if resolved == root || !resolved.starts_with(&root) {
        return Err(DatabaseError::PathTraversal(requested.to_string()));
    }

    if !resolved.is_file() {
        return Err(DatabaseError::BackupNotFound);
    }
    Ok(resolved)
}
