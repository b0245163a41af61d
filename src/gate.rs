//! Write-access gate consulted by every data-mutating operation
//!
//! Two independent switches: recovery mode (set when the database failed its
//! startup checks) refuses every mutation including backups, while read-only
//! mode (set when the license predicate fails) refuses business writes only.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::database::{DatabaseError, Result};

/// Class of mutation being attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Application-level writes
    Business,
    /// Backups and other operator maintenance
    Maintenance,
}

/// Process-wide write switches, shared by reference
#[derive(Debug, Default)]
pub struct WriteAccessGate {
    recovery_mode: AtomicBool,
    read_only_mode: AtomicBool,
}

impl WriteAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recovery_mode(&self) -> bool {
        self.recovery_mode.load(Ordering::Acquire)
    }

    pub fn set_recovery_mode(&self, enabled: bool) {
        let previous = self.recovery_mode.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            if enabled {
                warn!("recovery mode enabled; all writes are refused");
            } else {
                info!("recovery mode disabled");
            }
        }
    }

    pub fn is_read_only_mode(&self) -> bool {
        self.read_only_mode.load(Ordering::Acquire)
    }

    pub fn set_read_only_mode(&self, enabled: bool) {
        let previous = self.read_only_mode.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            if enabled {
                warn!("read-only mode enabled; business writes are refused");
            } else {
                info!("read-only mode disabled");
            }
        }
    }

    /// Refuse the write if either switch forbids this kind of mutation
    pub fn check(&self, kind: WriteKind) -> Result<()> {
        if self.is_recovery_mode() {
            return Err(DatabaseError::WriteBlocked("database is in recovery mode"));
        }
        if kind == WriteKind::Business && self.is_read_only_mode() {
            return Err(DatabaseError::WriteBlocked("database is in read-only mode"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_gate_allows_everything() {
        let gate = WriteAccessGate::new();
        assert!(gate.check(WriteKind::Business).is_ok());
        assert!(gate.check(WriteKind::Maintenance).is_ok());
    }

    #[test]
    fn test_recovery_mode_blocks_all_writes() {
        let gate = WriteAccessGate::new();
        gate.set_recovery_mode(true);

        assert!(matches!(
            gate.check(WriteKind::Business),
            Err(DatabaseError::WriteBlocked(_))
        ));
        assert!(matches!(
            gate.check(WriteKind::Maintenance),
            Err(DatabaseError::WriteBlocked(_))
        ));

        gate.set_recovery_mode(false);
        assert!(gate.check(WriteKind::Business).is_ok());
    }

    #[test]
    fn test_read_only_mode_keeps_maintenance_available() {
        let gate = WriteAccessGate::new();
        gate.set_read_only_mode(true);

        assert!(matches!(
            gate.check(WriteKind::Business),
            Err(DatabaseError::WriteBlocked(_))
        ));
        assert!(gate.check(WriteKind::Maintenance).is_ok());
    }

    #[test]
    fn test_flags_are_independent() {
        let gate = WriteAccessGate::new();
        gate.set_read_only_mode(true);
        gate.set_recovery_mode(true);
        gate.set_read_only_mode(false);

        assert!(gate.is_recovery_mode());
        assert!(!gate.is_read_only_mode());
    }
}
