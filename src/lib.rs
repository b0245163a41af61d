//! Backup, disaster recovery and liveness monitoring for an embedded SQLite
//! database served by a long-running process.

pub mod config;
pub mod database;
pub mod db;
pub mod gate;
pub mod recovery;
pub mod watchdog;
