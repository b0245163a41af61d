//! Backup naming module for generating and parsing timestamped archive names
//!
//! Archives are named `backup-<YYYY-MM-DDTHHMMSS>.zip` in local time. The
//! timestamp is zero-padded, so lexicographic order of the names is also
//! chronological order.

use chrono::NaiveDateTime;
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::path::Path;

/// Prefix shared by every archive file name
pub const ARCHIVE_PREFIX: &str = "backup-";

/// Extension shared by every archive file name
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// Timestamp layout embedded in archive names
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S";

/// Generate the archive file name for the given local timestamp
pub fn archive_file_name_at(timestamp: NaiveDateTime) -> String {
    format!(
        "{}{}{}",
        ARCHIVE_PREFIX,
        timestamp.format(TIMESTAMP_FORMAT),
        ARCHIVE_EXTENSION
    )
}

/// Generate a name for the raw snapshot file written before archiving.
///
/// The random suffix keeps two snapshots taken within the same second apart.
pub fn snapshot_file_name_at(timestamp: NaiveDateTime) -> String {
    let mut rng = thread_rng();
    let suffix: String = (0..6).map(|_| rng.sample(Alphanumeric) as char).collect();
    format!("snapshot-{}-{}.db", timestamp.format(TIMESTAMP_FORMAT), suffix)
}

/// Whether a file name follows the archive naming convention.
///
/// Only the prefix and extension are checked; the timestamp may still be
/// unparsable (see [`ArchiveName::parse`]).
pub fn is_archive_file_name(file_name: &str) -> bool {
    file_name.starts_with(ARCHIVE_PREFIX)
        && file_name.ends_with(ARCHIVE_EXTENSION)
        && file_name.len() > ARCHIVE_PREFIX.len() + ARCHIVE_EXTENSION.len()
}

/// Structured representation of a parsed archive name
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveName {
    /// Local time the archive was taken
    timestamp: NaiveDateTime,
}

impl ArchiveName {
    /// Parse an archive file name into its timestamp
    pub fn parse(file_name: &str) -> Option<Self> {
        let stamp = file_name
            .strip_prefix(ARCHIVE_PREFIX)?
            .strip_suffix(ARCHIVE_EXTENSION)?;

        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        Some(Self { timestamp })
    }

    /// Parse the file name component of a path
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::parse(path.file_name()?.to_str()?)
    }

    /// Get the local time the archive was taken
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_archive_file_name() {
        let name = archive_file_name_at(at(2025, 6, 1, 14, 30, 5));
        assert_eq!(name, "backup-2025-06-01T143005.zip");
    }

    #[test]
    fn test_parse_archive_name() {
        let parsed = ArchiveName::parse("backup-2025-06-01T143005.zip").unwrap();
        assert_eq!(parsed.timestamp(), at(2025, 6, 1, 14, 30, 5));

        let from_path =
            ArchiveName::from_path(Path::new("/backups/backup-2025-06-01T143005.zip")).unwrap();
        assert_eq!(from_path, parsed);
    }

    #[test]
    fn test_parse_invalid_archive_name() {
        // Wrong prefix
        assert!(ArchiveName::parse("snapshot-2025-06-01T143005.zip").is_none());

        // Wrong extension
        assert!(ArchiveName::parse("backup-2025-06-01T143005.db").is_none());

        // Hand-named file that still matches the convention's shape
        assert!(ArchiveName::parse("backup-before-upgrade.zip").is_none());

        // Impossible date
        assert!(ArchiveName::parse("backup-2025-13-01T143005.zip").is_none());
    }

    #[test]
    fn test_names_sort_chronologically() {
        let mut names = vec![
            archive_file_name_at(at(2025, 1, 10, 2, 0, 0)),
            archive_file_name_at(at(2024, 12, 31, 23, 59, 59)),
            archive_file_name_at(at(2025, 1, 9, 14, 0, 0)),
        ];
        names.sort();
        assert_eq!(
            names,
            vec![
                "backup-2024-12-31T235959.zip",
                "backup-2025-01-09T140000.zip",
                "backup-2025-01-10T020000.zip",
            ]
        );
    }

    #[test]
    fn test_is_archive_file_name() {
        assert!(is_archive_file_name("backup-2025-06-01T143005.zip"));
        assert!(is_archive_file_name("backup-before-upgrade.zip"));
        assert!(!is_archive_file_name("backup-.zip"));
        assert!(!is_archive_file_name("backup-2025-06-01T143005.zip.partial"));
        assert!(!is_archive_file_name("snapshot-2025-06-01T143005-abc123.db"));
    }

    #[test]
    fn test_snapshot_file_name_is_not_an_archive() {
        let name = snapshot_file_name_at(at(2025, 6, 1, 14, 30, 5));
        assert!(name.starts_with("snapshot-2025-06-01T143005-"));
        assert!(name.ends_with(".db"));
        assert!(!is_archive_file_name(&name));
    }
}
