//! Backup artifact naming and metadata.
//!
//! Artifacts are named `backup_<YYYYMMDD_HHMMSS>.sql` or
//! `backup_<YYYYMMDD_HHMMSS>.sql.gz`, the timestamp taken from the local
//! clock when the run started. Files that do not match are ignored by every
//! listing, so the artifact directory may safely hold other files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use regex::Regex;
use serde::Serialize;

use crate::connection::Engine;

pub const ARTIFACT_PREFIX: &str = "backup_";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Suffix of an artifact that is still being written
pub const PARTIAL_SUFFIX: &str = ".partial";
/// Sync-tool include filters matching every artifact format
pub const INCLUDE_PATTERNS: [&str; 2] = ["backup_*.sql", "backup_*.sql.gz"];

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup_(\d{8}_\d{6})\.(sql|sql\.gz)$").expect("artifact name pattern is valid")
});

/// Encoding of an artifact's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Plain SQL text
    Sql,
    /// Gzip-compressed SQL text
    SqlGz,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Sql => "sql",
            ArtifactFormat::SqlGz => "sql.gz",
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ArtifactFormat::SqlGz)
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A parsed artifact file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactName {
    pub timestamp: NaiveDateTime,
    pub format: ArtifactFormat,
}

impl ArtifactName {
    /// Name for a run started at `timestamp`; sub-second precision is dropped
    pub fn new(timestamp: NaiveDateTime, format: ArtifactFormat) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self { timestamp, format }
    }

    /// Parse a bare file name, returning `None` for anything that is not an
    /// artifact (including `.partial` files)
    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = ARTIFACT_NAME.captures(file_name)?;
        let timestamp = NaiveDateTime::parse_from_str(&captures[1], TIMESTAMP_FORMAT).ok()?;
        let format = match &captures[2] {
            "sql" => ArtifactFormat::Sql,
            _ => ArtifactFormat::SqlGz,
        };
        Some(Self { timestamp, format })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{ARTIFACT_PREFIX}{}.{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.format.extension()
        )
    }

    pub fn partial_file_name(&self) -> String {
        format!("{}{PARTIAL_SUFFIX}", self.file_name())
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Where a listed artifact lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLocation {
    Local,
    Remote,
}

/// One artifact produced by a backup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    /// Absolute local path, or the path relative to the remote folder
    pub path: PathBuf,
    pub name: String,
    pub format: ArtifactFormat,
    pub location: ArtifactLocation,
    /// Timestamp embedded in the name (local clock)
    pub created_at: NaiveDateTime,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Known for freshly produced artifacts, `None` for listings
    pub engine: Option<Engine>,
}

impl BackupArtifact {
    /// Describe a local file, or `None` if it is not an artifact
    pub fn from_local(path: &Path) -> std::io::Result<Option<Self>> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(parsed) = ArtifactName::parse(name) else {
            return Ok(None);
        };

        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            format: parsed.format,
            location: ArtifactLocation::Local,
            created_at: parsed.timestamp,
            modified_at: DateTime::<Utc>::from(metadata.modified()?),
            size_bytes: metadata.len(),
            engine: None,
        }))
    }

    /// Describe a remote listing entry, or `None` if it is not an artifact
    pub fn from_remote(
        path: &str,
        modified_at: DateTime<Utc>,
        size_bytes: u64,
    ) -> Option<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let parsed = ArtifactName::parse(name)?;
        Some(Self {
            path: PathBuf::from(path),
            name: name.to_string(),
            format: parsed.format,
            location: ArtifactLocation::Remote,
            created_at: parsed.timestamp,
            modified_at,
            size_bytes,
            engine: None,
        })
    }

    #[must_use]
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Time since last modification, zero for timestamps in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        crate::retention::age_of(self.modified_at, now)
    }
}

/// Order oldest to newest by modification time, ties broken by name
pub fn sort_oldest_first(artifacts: &mut [BackupArtifact]) {
    artifacts.sort_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_file_name_layout() {
        let name = ArtifactName::new(ts(3, 0, 7), ArtifactFormat::Sql);
        assert_eq!(name.file_name(), "backup_20240309_030007.sql");
        assert_eq!(name.partial_file_name(), "backup_20240309_030007.sql.partial");

        let gz = ArtifactName::new(ts(23, 59, 59), ArtifactFormat::SqlGz);
        assert_eq!(gz.file_name(), "backup_20240309_235959.sql.gz");
    }

    #[test]
    fn test_new_drops_subseconds() {
        let with_nanos = ts(1, 2, 3).with_nanosecond(450_000_000).unwrap();
        let name = ArtifactName::new(with_nanos, ArtifactFormat::Sql);
        assert_eq!(name.timestamp, ts(1, 2, 3));
    }

    #[test]
    fn test_parse_recovers_name() {
        let parsed = ArtifactName::parse("backup_20240309_030007.sql.gz").unwrap();
        assert_eq!(parsed.timestamp, ts(3, 0, 7));
        assert_eq!(parsed.format, ArtifactFormat::SqlGz);
    }

    #[rstest]
    #[case("backup_20240309_030007.sql.partial")]
    #[case("backup_20241332_030007.sql")]
    #[case("backup_2024030_030007.sql")]
    #[case("notes.txt")]
    #[case("backup_20240309_030007.dump")]
    #[case("xbackup_20240309_030007.sql")]
    fn test_parse_ignores_foreign_files(#[case] name: &str) {
        assert_eq!(ArtifactName::parse(name), None);
    }

    #[test]
    fn test_remote_entry_in_subfolder() {
        let artifact =
            BackupArtifact::from_remote("nested/backup_20240309_030007.sql", Utc::now(), 12)
                .unwrap();
        assert_eq!(artifact.name, "backup_20240309_030007.sql");
        assert_eq!(artifact.location, ArtifactLocation::Remote);
        assert!(BackupArtifact::from_remote("nested/readme.md", Utc::now(), 1).is_none());
    }

    #[test]
    fn test_local_artifact_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup_20240309_030007.sql");
        std::fs::write(&path, b"SELECT 1;\n").unwrap();
        std::fs::write(dir.path().join("other.sql"), b"").unwrap();

        let artifact = BackupArtifact::from_local(&path).unwrap().unwrap();
        assert_eq!(artifact.size_bytes, 10);
        assert_eq!(artifact.format, ArtifactFormat::Sql);
        assert!(
            BackupArtifact::from_local(&dir.path().join("other.sql"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_sort_breaks_ties_by_name() {
        let same = Utc::now();
        let mut artifacts = vec![
            BackupArtifact::from_remote("backup_20240309_030009.sql", same, 1).unwrap(),
            BackupArtifact::from_remote("backup_20240309_030007.sql", same, 1).unwrap(),
            BackupArtifact::from_remote(
                "backup_20240301_000000.sql",
                same - chrono::Duration::hours(1),
                1,
            )
            .unwrap(),
        ];
        sort_oldest_first(&mut artifacts);
        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "backup_20240301_000000.sql",
                "backup_20240309_030007.sql",
                "backup_20240309_030009.sql",
            ]
        );
    }
}
