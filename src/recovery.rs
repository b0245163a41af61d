//! Startup recovery decision
//!
//! Run once when the process starts, and again when an operator asks for a
//! re-check. A database that fails to open or fails its integrity check is
//! never allowed to serve writes: recovery mode is enabled and the operator is
//! offered the available backups.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, warn};

use crate::database::{DatabaseError, Result};
use crate::db::{DatabaseHandle, SqliteDatabase};
use crate::gate::WriteAccessGate;

/// Shown when the database failed its checks and backups were listed
pub const INTEGRITY_PROMPT: &str =
    "Database integrity check failed. Restore from a backup to continue.";

/// Shown when the database failed its checks and backups could not be listed
pub const LISTING_FAILED_PROMPT: &str = "Database integrity check failed and the backup \
     directory could not be read. Check the backup directory and restore manually.";

/// Source of restorable backups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupLister: Send + Sync {
    /// Archive paths, newest first
    async fn list_backups(&self) -> Result<Vec<PathBuf>>;
}

/// Outcome of [`decide`]
#[derive(Debug)]
pub struct RecoveryDecision {
    pub enabled: bool,
    pub message: String,
    pub backups: Vec<PathBuf>,
    /// Listing failure surfaced for logging; recovery stays enabled regardless
    pub listing_error: Option<DatabaseError>,
}

/// Whether a failure to open the primary database should enable recovery.
///
/// Every failure counts: malformed files, permission problems and driver
/// errors all mean the database cannot be trusted.
pub fn should_enter_recovery_on_connect_error(path: &Path, err: &DatabaseError) -> bool {
    warn!(path = %path.display(), error = %err, "database failed to open or verify");
    true
}

/// Decide whether recovery mode is needed.
///
/// `previous_backups` is returned unchanged when the database is healthy, and
/// is kept as the offered list when refreshing it fails.
pub async fn decide(
    db_path: &Path,
    lister: &dyn BackupLister,
    previous_backups: Vec<PathBuf>,
    previous_error: Option<&DatabaseError>,
    connect_error: Option<&DatabaseError>,
) -> RecoveryDecision {
    let Some(connect_error) = connect_error else {
        return RecoveryDecision {
            enabled: false,
            message: String::new(),
            backups: previous_backups,
            listing_error: None,
        };
    };

    error!(
        path = %db_path.display(),
        error = %connect_error,
        "database is not trustworthy, entering recovery mode"
    );
    if let Some(previous_error) = previous_error {
        warn!(error = %previous_error, "earlier backup listing had failed");
    }

    match lister.list_backups().await {
        Ok(backups) => RecoveryDecision {
            enabled: true,
            message: INTEGRITY_PROMPT.to_string(),
            backups,
            listing_error: None,
        },
        Err(listing_error) => RecoveryDecision {
            enabled: true,
            message: LISTING_FAILED_PROMPT.to_string(),
            backups: previous_backups,
            listing_error: Some(listing_error),
        },
    }
}

/// Operator-facing copy of the recovery state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryState {
    pub enabled: bool,
    pub message: String,
    pub backups: Vec<PathBuf>,
}

/// Owns the process-wide recovery state and the gate's recovery switch
pub struct RecoveryController {
    gate: Arc<WriteAccessGate>,
    state: RwLock<RecoveryState>,
}

impl RecoveryController {
    pub fn new(gate: Arc<WriteAccessGate>) -> Self {
        Self {
            gate,
            state: RwLock::new(RecoveryState::default()),
        }
    }

    /// Current state, copied
    pub fn state(&self) -> RecoveryState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a decision and flip the gate to match
    pub fn apply(&self, decision: &RecoveryDecision) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = RecoveryState {
            enabled: decision.enabled,
            message: decision.message.clone(),
            backups: decision.backups.clone(),
        };
        self.gate.set_recovery_mode(decision.enabled);
    }

    /// Probe the database at startup and apply the resulting decision.
    ///
    /// Returns the decision; its `listing_error` is for the caller to log.
    pub async fn startup(&self, db: &SqliteDatabase, lister: &dyn BackupLister) -> RecoveryDecision {
        let (previous, previous_error) = match lister.list_backups().await {
            Ok(backups) => (backups, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        self.check(db, lister, previous, previous_error.as_ref()).await
    }

    /// Operator-triggered re-check, typically right after a restore
    pub async fn recheck(&self, db: &SqliteDatabase, lister: &dyn BackupLister) -> RecoveryDecision {
        let previous = self.state().backups;
        self.check(db, lister, previous, None).await
    }

    async fn check(
        &self,
        db: &SqliteDatabase,
        lister: &dyn BackupLister,
        previous: Vec<PathBuf>,
        previous_error: Option<&DatabaseError>,
    ) -> RecoveryDecision {
        let path = db.file_path();
        let connect_error = db
            .open_checked()
            .await
            .err()
            .filter(|e| should_enter_recovery_on_connect_error(path, e));

        let decision = decide(
            path,
            lister,
            previous,
            previous_error,
            connect_error.as_ref(),
        )
        .await;
        self.apply(&decision);
        decision
    }
}
