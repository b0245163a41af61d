use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::database::{DatabaseError, Result};

/// Configuration for database backup and retention
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory holding backup archives; created on first use
    pub backup_dir: PathBuf,
    /// Archives older than this many days are pruned
    pub retention_days: u32,
    /// Local hour of the daily backup
    pub schedule_hour: u32,
    /// Local minute of the daily backup
    pub schedule_minute: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            retention_days: 7,
            schedule_hour: 2,
            schedule_minute: 0,
        }
    }
}

impl BackupConfig {
    /// Load backup configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let backup_dir = env::var("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.backup_dir);

        let retention_days = match env::var("BACKUP_RETENTION_DAYS") {
            Ok(v) => v.trim().parse().map_err(|_| {
                DatabaseError::Config(format!("BACKUP_RETENTION_DAYS is not a number: {}", v))
            })?,
            Err(_) => defaults.retention_days,
        };

        let (schedule_hour, schedule_minute) = match env::var("BACKUP_SCHEDULE") {
            Ok(v) => parse_time_of_day(&v)?,
            Err(_) => (defaults.schedule_hour, defaults.schedule_minute),
        };

        let config = Self {
            backup_dir,
            retention_days,
            schedule_hour,
            schedule_minute,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days < 1 {
            return Err(DatabaseError::Config(
                "retention must be at least one day".to_string(),
            ));
        }
        if self.schedule_hour > 23 || self.schedule_minute > 59 {
            return Err(DatabaseError::Config(format!(
                "invalid schedule time {:02}:{:02}",
                self.schedule_hour, self.schedule_minute
            )));
        }
        Ok(())
    }
}

/// Parse `HH:MM` into an hour and minute
fn parse_time_of_day(value: &str) -> Result<(u32, u32)> {
    let invalid = || DatabaseError::Config(format!("BACKUP_SCHEDULE must be HH:MM, got {}", value));

    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Process-level configuration for the server binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path of the live SQLite database
    pub database_path: PathBuf,
    /// Address the operator API listens on
    pub listen_addr: String,
    /// Watchdog interval; the maintenance loop pings at this period
    pub watchdog_interval: Duration,
    /// Force read-only mode, standing in for a failed license check
    pub license_read_only: bool,
    pub backup: BackupConfig,
}

impl AppConfig {
    /// Load application configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("db.sqlite"));

        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| String::from("0.0.0.0:8080"));

        let watchdog_secs = env::var("WATCHDOG_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);

        let license_read_only = env::var("LICENSE_READ_ONLY")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            database_path,
            listen_addr,
            watchdog_interval: Duration::from_secs(watchdog_secs),
            license_read_only,
            backup: BackupConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BackupConfig::default();
        assert_eq!(config.retention_days, 7);
        assert_eq!((config.schedule_hour, config.schedule_minute), (2, 0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = BackupConfig {
            retention_days: 0,
            ..BackupConfig::default()
        };
        assert!(matches!(config.validate(), Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("02:00").unwrap(), (2, 0));
        assert_eq!(parse_time_of_day(" 23:59 ").unwrap(), (23, 59));
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("noon").is_err());
    }
}
