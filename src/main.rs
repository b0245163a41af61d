use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db_guardian::config::AppConfig;
use db_guardian::database::{BackupService, BackupStatus, DatabaseError};
use db_guardian::db::{DatabaseHandle, SqliteDatabase};
use db_guardian::gate::WriteAccessGate;
use db_guardian::recovery::{RecoveryController, RecoveryState};
use db_guardian::watchdog::{self, Watchdog};

// Define a struct to hold our application state
struct AppState {
    db: Arc<SqliteDatabase>,
    backups: Arc<BackupService>,
    recovery: RecoveryController,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

// Maps service errors onto HTTP responses
struct ApiError(DatabaseError);

impl From<DatabaseError> for ApiError {
    fn from(error: DatabaseError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DatabaseError::AlreadyRunning => StatusCode::CONFLICT,
            DatabaseError::PathTraversal(_) => StatusCode::BAD_REQUEST,
            DatabaseError::BackupNotFound | DatabaseError::EntryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DatabaseError::WriteBlocked(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// Handler for the last backup outcome
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<BackupStatus> {
    Json(state.backups.get_status())
}

// Handler to list archives, newest first
async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PathBuf>>, ApiError> {
    Ok(Json(state.backups.list_backups().await?))
}

// Handler to run a backup immediately
async fn backup_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupStatus>, ApiError> {
    state.backups.execute().await?;
    Ok(Json(state.backups.get_status()))
}

// Body for the restore route
#[derive(Deserialize)]
struct RestoreRequest {
    path: String,
}

// Handler to restore an archive, then re-check the database
async fn restore_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<RecoveryState>, ApiError> {
    state.backups.restore(&request.path).await?;

    let decision = state
        .recovery
        .recheck(&state.db, state.backups.as_ref())
        .await;
    if let Some(e) = decision.listing_error {
        warn!(error = %e, "could not list backups after restore");
    }

    Ok(Json(state.recovery.state()))
}

// Handler for the current recovery state
async fn recovery_handler(State(state): State<Arc<AppState>>) -> Json<RecoveryState> {
    Json(state.recovery.state())
}

// Handler for an operator-triggered re-check
async fn recheck_handler(State(state): State<Arc<AppState>>) -> Json<RecoveryState> {
    let decision = state
        .recovery
        .recheck(&state.db, state.backups.as_ref())
        .await;
    if let Some(e) = decision.listing_error {
        warn!(error = %e, "could not list backups during re-check");
    }
    Json(state.recovery.state())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let gate = Arc::new(WriteAccessGate::new());
    gate.set_read_only_mode(config.license_read_only);

    let db = Arc::new(SqliteDatabase::new(&config.database_path));
    let backups = Arc::new(BackupService::new(
        config.backup.clone(),
        db.clone(),
        gate.clone(),
    ));

    // Decide whether the database may serve writes before anything else runs
    let recovery = RecoveryController::new(gate.clone());
    let decision = recovery.startup(&db, backups.as_ref()).await;
    if let Some(e) = &decision.listing_error {
        warn!(error = %e, "could not list backups at startup");
    }
    if decision.enabled {
        warn!(
            message = %decision.message,
            backups = decision.backups.len(),
            "starting in recovery mode"
        );
    } else {
        info!(path = %config.database_path.display(), "database passed integrity check");
    }

    let shutdown = CancellationToken::new();
    backups.start_scheduler(&shutdown);

    // A stalled maintenance loop takes the whole process down
    let watchdog = Arc::new(Watchdog::new(config.watchdog_interval));
    let failure_token = shutdown.clone();
    watchdog.start(&shutdown, move || {
        error!("maintenance loop stalled; shutting down");
        failure_token.cancel();
    });
    watchdog::spawn_heartbeat(watchdog.clone(), shutdown.clone());

    // Create the application state
    let state = Arc::new(AppState {
        db: db.clone(),
        backups: backups.clone(),
        recovery,
    });

    // Set up the routes
    let app = Router::new()
        .route("/api/backup/status", get(status_handler))
        .route("/api/backup", post(backup_handler))
        .route("/api/backups", get(list_handler))
        .route("/api/restore", post(restore_handler))
        .route("/api/recovery", get(recovery_handler))
        .route("/api/recovery/recheck", post(recheck_handler))
        .with_state(state);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "server starting");

    let serve_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_token.cancelled().await })
        .await?;

    backups.stop_scheduler();
    watchdog.stop();
    db.close().await?;
    Ok(())
}
