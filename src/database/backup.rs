//! SQLite database backup service
//!
//! Orchestrates the snapshot engine and archive storage behind a
//! non-reentrant guard: at most one backup or restore runs per process, and a
//! second caller is turned away immediately instead of queueing.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BackupConfig;
use crate::database::backup_naming;
use crate::database::restore;
use crate::database::scheduler;
use crate::database::snapshot::SnapshotEngine;
use crate::database::storage::{ArchiveStorage, LocalArchiveStorage};
use crate::database::{DATABASE_ENTRY_NAME, DatabaseError, Result};
use crate::db::DatabaseHandle;
use crate::gate::{WriteAccessGate, WriteKind};
use crate::recovery::BackupLister;

/// Outcome of the most recent backup run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackupStatus {
    /// When the last run finished
    pub last_run: Option<DateTime<Local>>,
    /// Archive produced by the last successful run
    pub archive_path: Option<PathBuf>,
    /// Size of that archive in bytes
    pub size_bytes: u64,
    pub success: bool,
    pub message: String,
    /// Whether a backup or restore is executing right now
    pub is_running: bool,
}

/// Clears the running flag when a backup or restore ends
struct RunGuard<'a> {
    running: &'a Mutex<bool>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// Backup, restore and scheduling for the live database
pub struct BackupService {
    config: BackupConfig,
    db: Arc<dyn DatabaseHandle>,
    storage: Arc<dyn ArchiveStorage>,
    engine: SnapshotEngine,
    gate: Arc<WriteAccessGate>,
    /// Set while a backup or restore executes
    running: Mutex<bool>,
    status: RwLock<BackupStatus>,
    /// Token of the scheduler loop, if one was started
    scheduler: Mutex<Option<CancellationToken>>,
}

impl BackupService {
    /// Create a backup service storing archives in the configured directory
    pub fn new(
        config: BackupConfig,
        db: Arc<dyn DatabaseHandle>,
        gate: Arc<WriteAccessGate>,
    ) -> Self {
        let storage = Arc::new(LocalArchiveStorage::new(&config));
        Self::with_parts(config, db, storage, SnapshotEngine::default(), gate)
    }

    pub fn with_parts(
        config: BackupConfig,
        db: Arc<dyn DatabaseHandle>,
        storage: Arc<dyn ArchiveStorage>,
        engine: SnapshotEngine,
        gate: Arc<WriteAccessGate>,
    ) -> Self {
        Self {
            config,
            db,
            storage,
            engine,
            gate,
            running: Mutex::new(false),
            status: RwLock::new(BackupStatus::default()),
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Name of the single entry inside each archive
    fn entry_name(&self) -> String {
        self.db
            .file_path()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DATABASE_ENTRY_NAME)
            .to_string()
    }

    fn try_begin(&self) -> Result<RunGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if *running {
            return Err(DatabaseError::AlreadyRunning);
        }
        *running = true;
        Ok(RunGuard {
            running: &self.running,
        })
    }

    fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_status(&self, status: BackupStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Snapshot the database into a new archive now.
    ///
    /// Returns [`DatabaseError::AlreadyRunning`] without doing any work if a
    /// backup or restore is already executing.
    pub async fn execute(&self) -> Result<PathBuf> {
        let _guard = self.try_begin()?;

        match self.run_backup().await {
            Ok((archive_path, size_bytes)) => {
                info!(
                    archive = %archive_path.display(),
                    size_bytes,
                    "backup completed"
                );
                self.record_status(BackupStatus {
                    last_run: Some(Local::now()),
                    archive_path: Some(archive_path.clone()),
                    size_bytes,
                    success: true,
                    message: format!("Backup written to {}", archive_path.display()),
                    is_running: false,
                });
                Ok(archive_path)
            }
            Err(e) => {
                error!(error = %e, "backup failed");
                self.record_status(BackupStatus {
                    last_run: Some(Local::now()),
                    archive_path: None,
                    size_bytes: 0,
                    success: false,
                    message: e.to_string(),
                    is_running: false,
                });
                Err(e)
            }
        }
    }

    async fn run_backup(&self) -> Result<(PathBuf, u64)> {
        self.gate.check(WriteKind::Maintenance)?;
        self.storage.ensure_dir().await?;

        let taken_at = Local::now().naive_local();
        let snapshot_path = self
            .storage
            .backup_dir()
            .join(backup_naming::snapshot_file_name_at(taken_at));

        let result = self.snapshot_and_archive(&snapshot_path, taken_at).await;

        match tokio::fs::remove_file(&snapshot_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %snapshot_path.display(), error = %e, "failed to remove snapshot file");
            }
        }

        result
    }

    async fn snapshot_and_archive(
        &self,
        snapshot_path: &Path,
        taken_at: chrono::NaiveDateTime,
    ) -> Result<(PathBuf, u64)> {
        self.engine.snapshot(self.db.as_ref(), snapshot_path).await?;

        let archive_path = self
            .storage
            .store_snapshot(snapshot_path, &self.entry_name(), taken_at)
            .await?;
        let size_bytes = tokio::fs::metadata(&archive_path).await?.len();

        match self.storage.prune(self.config.retention_days).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned expired backups"),
            Err(e) => warn!(error = %e, "pruning expired backups failed"),
        }

        Ok((archive_path, size_bytes))
    }

    /// Copy of the last recorded status with the live running flag
    pub fn get_status(&self) -> BackupStatus {
        let mut status = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.is_running = self.is_running();
        status
    }

    /// Archive paths, newest first
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>> {
        self.storage.list_archives().await
    }

    /// Replace the live database with the contents of an archive.
    ///
    /// `requested` is a bare archive name or a path inside the backup
    /// directory. The live connection is closed for the swap and every query
    /// waits until it has been reopened. Not gated: this is how an operator
    /// leaves recovery mode.
    pub async fn restore(&self, requested: &str) -> Result<PathBuf> {
        let _guard = self.try_begin()?;

        let archive_path = restore::resolve_archive_path(self.storage.backup_dir(), requested)?;
        let db_path = self.db.file_path().to_path_buf();
        let staging = restore::staging_path(&db_path);

        info!(archive = %archive_path.display(), "restoring database from backup");
        self.storage
            .extract_entry(&archive_path, &self.entry_name(), &staging)
            .await?;

        let swap_result = self
            .db
            .with_connection_closed(Box::new(move || {
                restore::swap_into_place(&staging, &db_path)
            }))
            .await;

        if let Err(e) = swap_result {
            error!(
                archive = %archive_path.display(),
                error = %e,
                "restore failed after closing the database; manual intervention required"
            );
            return Err(e);
        }

        info!(archive = %archive_path.display(), "database restored");
        Ok(archive_path)
    }

    /// Start the daily backup loop.
    ///
    /// Returns `false` if a scheduler is already running. The loop ends when
    /// [`stop_scheduler`](Self::stop_scheduler) is called or `shutdown` fires.
    pub fn start_scheduler(self: &Arc<Self>, shutdown: &CancellationToken) -> bool {
        let mut slot = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|token| !token.is_cancelled()) {
            warn!("backup scheduler already running");
            return false;
        }

        let token = shutdown.child_token();
        *slot = Some(token.clone());

        let service = Arc::clone(self);
        let (hour, minute) = (self.config.schedule_hour, self.config.schedule_minute);
        tokio::spawn(scheduler::run_daily(hour, minute, token, move || {
            let service = Arc::clone(&service);
            async move {
                if let Err(e) = service.execute().await {
                    error!(error = %e, "scheduled backup failed");
                }
            }
        }));

        info!(hour, minute, "backup scheduler started");
        true
    }

    /// Stop the daily backup loop; does nothing if none is running
    pub fn stop_scheduler(&self) {
        if let Some(token) = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

#[async_trait]
impl BackupLister for BackupService {
    async fn list_backups(&self) -> Result<Vec<PathBuf>> {
        BackupService::list_backups(self).await
    }
}
