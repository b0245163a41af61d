use async_trait::async_trait;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::{DatabaseError, Result};
use crate::gate::{WriteAccessGate, WriteKind};

// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Filesystem work performed while the connection is closed
pub type SwapFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Handle to the live database that backups snapshot and restores replace
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Path of the database file on disk
    fn file_path(&self) -> &Path;

    /// Execute a raw SQL command
    async fn exec(&self, command: &str) -> Result<()>;

    /// Open (or reopen) the connection
    async fn connect(&self) -> Result<()>;

    /// Close the connection; later queries fail with [`DatabaseError::Closed`]
    async fn close(&self) -> Result<()>;

    /// Close the connection, run `swap` with exclusive access to the database
    /// files, then reconnect.
    ///
    /// Queries in flight finish before the connection closes and new ones wait
    /// until the swap is over. If `swap` fails the connection stays closed.
    async fn with_connection_closed(&self, swap: SwapFn) -> Result<()>;
}

/// SQLite database served from a WAL-mode sqlx pool
pub struct SqliteDatabase {
    path: PathBuf,
    pool: RwLock<Option<DbPool>>,
}

impl SqliteDatabase {
    /// Create a handle for the database at `path` without connecting
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: RwLock::new(None),
        }
    }

    async fn open_pool(path: &Path) -> Result<DbPool> {
        // Set up connection options
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    /// Connect and verify integrity; the startup probe for recovery mode
    pub async fn open_checked(&self) -> Result<()> {
        self.connect().await?;
        self.integrity_check().await
    }

    /// Run `PRAGMA integrity_check`, which must report exactly `ok`
    pub async fn integrity_check(&self) -> Result<()> {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(DatabaseError::Closed)?;

        let rows: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_all(pool)
            .await?;

        match rows.as_slice() {
            [only] if only == "ok" => Ok(()),
            _ => Err(DatabaseError::Sqlite(format!(
                "integrity check failed: {}",
                rows.join("; ")
            ))),
        }
    }

    /// Fetch a single integer column from the first row
    pub async fn query_i64(&self, sql: &str) -> Result<i64> {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(DatabaseError::Closed)?;

        let value = sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await?;
        Ok(value)
    }

    /// Execute a business mutation after consulting the write gate
    pub async fn guarded_exec(&self, gate: &WriteAccessGate, sql: &str) -> Result<u64> {
        gate.check(WriteKind::Business)?;

        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(DatabaseError::Closed)?;

        let result = sqlx::query(sql).execute(pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }
}

#[async_trait]
impl DatabaseHandle for SqliteDatabase {
    fn file_path(&self) -> &Path {
        &self.path
    }

    async fn exec(&self, command: &str) -> Result<()> {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(DatabaseError::Closed)?;

        sqlx::raw_sql(command).execute(pool).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        let pool = Self::open_pool(&self.path).await?;
        if let Some(previous) = guard.replace(pool) {
            previous.close().await;
        }
        info!(path = %self.path.display(), "database connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            info!(path = %self.path.display(), "database closed");
        }
        Ok(())
    }

    async fn with_connection_closed(&self, swap: SwapFn) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
        }
        debug!(path = %self.path.display(), "connection closed for file swap");

        tokio::task::spawn_blocking(swap).await??;

        *guard = Some(Self::open_pool(&self.path).await?);
        info!(path = %self.path.display(), "database reopened after file swap");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_checked_fresh_database() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = SqliteDatabase::new(temp_dir.path().join("fresh.db"));

        db.open_checked().await?;
        db.exec("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;
        db.exec("INSERT INTO items (name) VALUES ('a'), ('b')").await?;

        assert_eq!(db.query_i64("SELECT COUNT(*) FROM items").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_checked_rejects_garbage_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("garbage.db");
        std::fs::write(&path, b"this is definitely not a sqlite database file ".repeat(200))?;

        let db = SqliteDatabase::new(&path);
        assert!(db.open_checked().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_handle_refuses_queries() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = SqliteDatabase::new(temp_dir.path().join("closed.db"));
        db.connect().await?;
        db.close().await?;

        assert!(matches!(db.exec("SELECT 1").await, Err(DatabaseError::Closed)));
        assert!(!db.is_connected().await);

        // Closing twice is harmless
        db.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_guarded_exec_consults_gate() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = SqliteDatabase::new(temp_dir.path().join("gated.db"));
        db.connect().await?;
        db.exec("CREATE TABLE items (id INTEGER PRIMARY KEY)").await?;

        let gate = WriteAccessGate::new();
        assert_eq!(
            db.guarded_exec(&gate, "INSERT INTO items DEFAULT VALUES").await?,
            1
        );

        gate.set_read_only_mode(true);
        let blocked = db.guarded_exec(&gate, "INSERT INTO items DEFAULT VALUES").await;
        assert!(matches!(blocked, Err(DatabaseError::WriteBlocked(_))));
        assert_eq!(db.query_i64("SELECT COUNT(*) FROM items").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_swap_leaves_connection_closed() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = SqliteDatabase::new(temp_dir.path().join("swap.db"));
        db.connect().await?;

        let result = db
            .with_connection_closed(Box::new(|| Err(DatabaseError::Storage("boom".into()))))
            .await;

        assert!(matches!(result, Err(DatabaseError::Storage(_))));
        assert!(!db.is_connected().await);
        Ok(())
    }
}
