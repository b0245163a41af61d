//! Local filesystem implementation of the ArchiveStorage trait
//!
//! Each archive is a zip container holding exactly one entry: the database
//! file under its canonical name.

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::BackupConfig;
use crate::database::backup_naming::{self, ArchiveName};
use crate::database::{DatabaseError, Result};

use super::ArchiveStorage;

/// Suffix of archives that are still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// Provides local filesystem storage for backup archives
pub struct LocalArchiveStorage {
    /// Directory holding the archives
    backup_dir: PathBuf,
}

impl LocalArchiveStorage {
    /// Create a new LocalArchiveStorage with the given configuration
    pub fn new(config: &BackupConfig) -> Self {
        Self::with_dir(config.backup_dir.clone())
    }

    pub fn with_dir(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Delete archives whose embedded timestamp is older than `cutoff`.
    ///
    /// Names without a parsable timestamp are left alone. A failed deletion is
    /// logged and the pass carries on.
    pub async fn prune_before(&self, cutoff: NaiveDateTime) -> Result<usize> {
        let archives = self.list_archives().await?;
        Ok(remove_expired(archives, cutoff).await)
    }
}

async fn remove_expired(archives: Vec<PathBuf>, cutoff: NaiveDateTime) -> usize {
    let mut removed = 0;

    for path in archives {
        let Some(name) = ArchiveName::from_path(&path) else {
            debug!(path = %path.display(), "skipping archive with unparsable timestamp");
            continue;
        };

        if name.timestamp() >= cutoff {
            continue;
        }

        match tokio_fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "pruned expired backup");
                removed += 1;
            }
            // Removed by someone else in the meantime
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to prune backup");
            }
        }
    }

    removed
}

fn write_archive(snapshot_path: &Path, entry_name: &str, archive_path: &Path) -> Result<()> {
    let mut input = File::open(snapshot_path)?;
    let output = File::create(archive_path)?;

    let mut zip = ZipWriter::new(output);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    zip.start_file(entry_name, options)?;
    io::copy(&mut input, &mut zip)?;

    let output = zip.finish()?;
    output.sync_all()?;
    Ok(())
}

fn read_entry(archive_path: &Path, entry_name: &str, destination_path: &Path) -> Result<u64> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(DatabaseError::EntryNotFound(entry_name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut output = File::create(destination_path)?;
    let written = io::copy(&mut entry, &mut output)?;
    output.sync_all()?;
    Ok(written)
}

#[async_trait]
impl ArchiveStorage for LocalArchiveStorage {
    fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio_fs::create_dir_all(&self.backup_dir).await?;
        Ok(())
    }

    async fn store_snapshot(
        &self,
        snapshot_path: &Path,
        entry_name: &str,
        taken_at: NaiveDateTime,
    ) -> Result<PathBuf> {
        self.ensure_dir().await?;

        let file_name = backup_naming::archive_file_name_at(taken_at);
        let archive_path = self.backup_dir.join(&file_name);
        let partial_path = self
            .backup_dir
            .join(format!("{}{}", file_name, PARTIAL_SUFFIX));

        let source = snapshot_path.to_path_buf();
        let target = partial_path.clone();
        let entry = entry_name.to_string();
        let written =
            tokio::task::spawn_blocking(move || write_archive(&source, &entry, &target)).await?;

        if let Err(e) = written {
            let _ = tokio_fs::remove_file(&partial_path).await;
            return Err(e);
        }

        // Listing never sees the archive until it is complete. Linking fails
        // instead of replacing an archive taken within the same second.
        let linked = tokio_fs::hard_link(&partial_path, &archive_path).await;
        if let Err(e) = tokio_fs::remove_file(&partial_path).await {
            warn!(path = %partial_path.display(), error = %e, "failed to remove partial archive");
        }
        match linked {
            Ok(()) => Ok(archive_path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(DatabaseError::Storage(
                format!("archive already exists: {}", archive_path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn extract_entry(
        &self,
        archive_path: &Path,
        entry_name: &str,
        destination_path: &Path,
    ) -> Result<u64> {
        let archive = archive_path.to_path_buf();
        let entry = entry_name.to_string();
        let destination = destination_path.to_path_buf();

        let result =
            tokio::task::spawn_blocking(move || read_entry(&archive, &entry, &destination))
                .await?;

        if result.is_err() {
            let _ = tokio_fs::remove_file(destination_path).await;
        }
        result
    }

    async fn list_archives(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio_fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();

        // Entries can vanish mid-iteration when a prune runs concurrently
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        dir = %self.backup_dir.display(),
                        error = %e,
                        "stopped reading backup directory early"
                    );
                    break;
                }
            };
            let is_file = match entry.file_type().await {
                Ok(file_type) => file_type.is_file(),
                Err(_) => continue,
            };
            if !is_file {
                continue;
            }

            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str() {
                if backup_naming::is_archive_file_name(name) {
                    archives.push(entry.path());
                }
            }
        }

        // Timestamped names sort chronologically; newest first
        archives.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        Ok(archives)
    }

    async fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Local::now().naive_local() - Duration::days(i64::from(retention_days));
        self.prune_before(cutoff).await
    }
}
