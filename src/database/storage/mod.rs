//! Storage module for backup archives
//!
//! This module abstracts where archives live and how they are packed, so the
//! backup service only deals with snapshot files and archive paths.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

use crate::database::Result;

pub mod local_storage;

pub use local_storage::LocalArchiveStorage;

/// Archive & retention operations over a backup directory
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Directory holding the archives
    fn backup_dir(&self) -> &Path;

    /// Create the backup directory if it does not exist yet
    async fn ensure_dir(&self) -> Result<()>;

    /// Wrap a raw snapshot file into a timestamped archive
    ///
    /// # Arguments
    /// * `snapshot_path` - Raw snapshot produced by the snapshot engine
    /// * `entry_name` - Name of the single entry inside the archive
    /// * `taken_at` - Local time the snapshot was taken; names the archive
    ///
    /// Returns the path of the finished archive
    async fn store_snapshot(
        &self,
        snapshot_path: &Path,
        entry_name: &str,
        taken_at: NaiveDateTime,
    ) -> Result<PathBuf>;

    /// Copy the named entry of an archive into `destination_path`
    ///
    /// Returns the number of bytes written
    async fn extract_entry(
        &self,
        archive_path: &Path,
        entry_name: &str,
        destination_path: &Path,
    ) -> Result<u64>;

    /// List archive paths, newest first
    ///
    /// A missing backup directory yields an empty list
    async fn list_archives(&self) -> Result<Vec<PathBuf>>;

    /// Delete archives older than `retention_days`
    ///
    /// Returns the number of archives actually removed
    async fn prune(&self, retention_days: u32) -> Result<usize>;
}
