//! Point-in-time snapshots of the live SQLite file
//!
//! The primary strategy asks SQLite for a consistent copy with `VACUUM INTO`,
//! which is safe while other connections keep writing. If the engine refuses
//! (too old, or the handle is not SQLite-backed), the fallback checkpoints the
//! WAL and copies the main file byte for byte. That copy can miss writes that
//! land while it runs, so it is logged as a degraded snapshot.

use std::path::Path;
use tracing::{info, warn};

use crate::database::{DatabaseError, Result};
use crate::db::DatabaseHandle;

/// One way of producing a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStrategy {
    /// `VACUUM INTO '<destination>'`
    VacuumInto,
    /// Best-effort WAL checkpoint followed by a plain file copy
    CheckpointCopy,
}

impl SnapshotStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotStrategy::VacuumInto => "vacuum-into",
            SnapshotStrategy::CheckpointCopy => "checkpoint-copy",
        }
    }

    /// Write a snapshot of `db` to `destination`
    pub async fn run(&self, db: &dyn DatabaseHandle, destination: &Path) -> Result<()> {
        match self {
            SnapshotStrategy::VacuumInto => vacuum_into(db, destination).await,
            SnapshotStrategy::CheckpointCopy => checkpoint_copy(db, destination).await,
        }
    }
}

/// Runs the primary strategy and falls back to the secondary one
#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    primary: SnapshotStrategy,
    fallback: SnapshotStrategy,
}

impl Default for SnapshotEngine {
    fn default() -> Self {
        Self::new(SnapshotStrategy::VacuumInto, SnapshotStrategy::CheckpointCopy)
    }
}

impl SnapshotEngine {
    pub fn new(primary: SnapshotStrategy, fallback: SnapshotStrategy) -> Self {
        Self { primary, fallback }
    }

    /// Snapshot `db` into `destination`.
    ///
    /// When both strategies fail, both error messages are returned unchanged.
    pub async fn snapshot(&self, db: &dyn DatabaseHandle, destination: &Path) -> Result<()> {
        let primary_error = match self.primary.run(db, destination).await {
            Ok(()) => {
                info!(
                    strategy = self.primary.name(),
                    destination = %destination.display(),
                    "consistent snapshot written"
                );
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            strategy = self.primary.name(),
            error = %primary_error,
            "primary snapshot failed, trying fallback"
        );

        match self.fallback.run(db, destination).await {
            Ok(()) => {
                warn!(
                    strategy = self.fallback.name(),
                    destination = %destination.display(),
                    "snapshot written by fallback; copy may not be point-in-time consistent under write load"
                );
                Ok(())
            }
            Err(fallback_error) => Err(DatabaseError::Snapshot {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
        }
    }
}

/// Quote a path for embedding in a SQL string literal
fn sql_quote_path(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    let text = absolute.to_str().ok_or_else(|| {
        DatabaseError::Storage(format!("path is not valid UTF-8: {}", absolute.display()))
    })?;
    Ok(format!("'{}'", text.replace('\'', "''")))
}

async fn vacuum_into(db: &dyn DatabaseHandle, destination: &Path) -> Result<()> {
    // VACUUM INTO does not accept bound parameters
    let target = sql_quote_path(destination)?;
    db.exec(&format!("VACUUM INTO {}", target))
        .await
        .map_err(|e| DatabaseError::Sqlite(format!("VACUUM INTO failed: {}", e)))
}

async fn checkpoint_copy(db: &dyn DatabaseHandle, destination: &Path) -> Result<()> {
    if let Err(e) = db.exec("PRAGMA wal_checkpoint(TRUNCATE)").await {
        warn!(error = %e, "WAL checkpoint failed before file copy");
    }

    let source = db.file_path();
    let metadata = tokio::fs::metadata(source).await?;
    if !metadata.is_file() {
        return Err(DatabaseError::Storage(format!(
            "{} is not a regular file",
            source.display()
        )));
    }

    tokio::fs::copy(source, destination).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SqliteDatabase, SwapFn};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Handle whose SQL commands always fail, forcing the file-copy path
    struct NoSqlHandle {
        path: PathBuf,
    }

    #[async_trait]
    impl DatabaseHandle for NoSqlHandle {
        fn file_path(&self) -> &Path {
            &self.path
        }

        async fn exec(&self, command: &str) -> Result<()> {
            Err(DatabaseError::Sqlite(format!("unsupported: {}", command)))
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn with_connection_closed(&self, swap: SwapFn) -> Result<()> {
            swap()
        }
    }

    #[tokio::test]
    async fn test_vacuum_into_snapshot() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = SqliteDatabase::new(temp_dir.path().join("live.db"));
        db.connect().await?;
        db.exec("CREATE TABLE test (id INTEGER PRIMARY KEY, value TEXT)")
            .await?;
        db.exec("INSERT INTO test (value) VALUES ('it''s'), ('two')")
            .await?;

        // Quote in the destination path exercises the escaping
        let destination = temp_dir.path().join("snap'shot.db");
        SnapshotEngine::default().snapshot(&db, &destination).await?;

        let copy = SqliteDatabase::new(&destination);
        copy.open_checked().await?;
        assert_eq!(copy.query_i64("SELECT COUNT(*) FROM test").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fallback_copies_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let source = temp_dir.path().join("live.db");
        std::fs::write(&source, b"raw database bytes")?;

        let handle = NoSqlHandle { path: source };
        let destination = temp_dir.path().join("copy.db");
        SnapshotEngine::default()
            .snapshot(&handle, &destination)
            .await?;

        assert_eq!(std::fs::read(&destination)?, b"raw database bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_both_strategies_failing_reports_both_errors() -> Result<()> {
        let temp_dir = tempdir()?;
        // A directory is not a regular file, so the copy refuses it
        let handle = NoSqlHandle {
            path: temp_dir.path().to_path_buf(),
        };

        let err = SnapshotEngine::default()
            .snapshot(&handle, &temp_dir.path().join("copy.db"))
            .await
            .unwrap_err();

        match err {
            DatabaseError::Snapshot { primary, fallback } => {
                assert!(primary.contains("VACUUM INTO"));
                assert!(fallback.contains("not a regular file"));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_sql_quote_path_escapes_quotes() -> Result<()> {
        let quoted = sql_quote_path(Path::new("/tmp/o'brien/db.sqlite"))?;
        assert_eq!(quoted, "'/tmp/o''brien/db.sqlite'");
        Ok(())
    }
}
