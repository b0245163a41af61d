//! Backup, restore and retention for the live SQLite database file

pub mod storage;

pub mod backup;
pub mod backup_naming;
pub mod restore;
pub mod scheduler;
pub mod snapshot;

pub use backup::{BackupService, BackupStatus};
pub use snapshot::{SnapshotEngine, SnapshotStrategy};

/// Name of the single entry stored inside every backup archive
pub const DATABASE_ENTRY_NAME: &str = "db.sqlite";

/// Database error type for backup/restore operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backup not found")]
    BackupNotFound,

    #[error("Archive does not contain entry {0}")]
    EntryNotFound(String),

    #[error("Backup already in progress")]
    AlreadyRunning,

    #[error("Path escapes the backup directory: {0}")]
    PathTraversal(String),

    #[error("Snapshot failed: primary: {primary}; fallback: {fallback}")]
    Snapshot { primary: String, fallback: String },

    #[error("Write blocked: {0}")]
    WriteBlocked(&'static str),

    #[error("Database connection is closed")]
    Closed,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::Sqlite(error.to_string())
    }
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(error: tokio::task::JoinError) -> Self {
        DatabaseError::Task(error.to_string())
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
