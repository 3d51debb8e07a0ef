//! # Error Types
//!
//! Error taxonomy shared by every Strongbox crate. Each pipeline stage owns
//! one enum so callers can tell a fatal failure (`ConfigError`, `DumpError`,
//! `RestoreError`) from one that is only logged (`UploadError`,
//! `RetentionError`).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::connection::Engine;
use crate::lock::Operation;

/// Maximum number of characters of a failing statement kept in errors
pub const STATEMENT_EXCERPT_CHARS: usize = 200;

/// Configuration could not be loaded or is invalid
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided
    #[error("Missing required setting '{key}'")]
    Missing { key: String },

    /// An environment variable held a value of the wrong shape
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    /// The datastore connection string could not be parsed
    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// The connection string names an engine Strongbox does not know
    #[error("Unsupported datastore engine '{engine}'")]
    UnsupportedEngine { engine: String },

    /// No dump strategy was registered for the configured engine
    #[error("No dump strategy registered for engine '{engine}'")]
    NoDumpStrategy { engine: Engine },

    /// The backup schedule expression is not a valid cron or interval
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The configuration file could not be read or parsed
    #[error("Failed to load configuration file {}: {message}", path.display())]
    File { path: PathBuf, message: String },

    /// Cross-field validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// An external command (dump tool, sync tool) failed
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully
    #[error("'{program}' exited with {}: {stderr}", exit_description(.code))]
    Failed {
        program: String,
        /// `None` when the program was terminated by a signal
        code: Option<i32>,
        stderr: String,
    },

    /// The program exceeded its deadline and was killed
    #[error("'{program}' timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    /// The program was killed by an explicit cancellation
    #[error("'{program}' was cancelled")]
    Cancelled { program: String },

    /// Reading or writing the program's streams failed
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program produced output that could not be understood
    #[error("Unexpected output from '{program}': {message}")]
    Output { program: String, message: String },
}

/// Producing a dump artifact failed; no artifact exists afterwards
#[derive(Debug, Error)]
pub enum DumpError {
    /// Could not open a connection to the datastore
    #[error("Failed to connect to {engine} datastore: {reason}")]
    Connect { engine: Engine, reason: String },

    /// A catalog or data query failed mid-dump
    #[error("Dump query failed ({context}): {reason}")]
    Query { context: String, reason: String },

    /// The native export tool failed
    #[error("Export tool failed: {0}")]
    Tool(#[from] ToolError),

    /// Writing the artifact failed
    #[error("Artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The dump exceeded its deadline
    #[error("Dump timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The dump was cancelled before it finished
    #[error("Dump cancelled")]
    Cancelled,

    /// The blocking dump worker panicked or was aborted
    #[error("Dump worker failed: {0}")]
    Worker(String),
}

/// Replicating an artifact to the remote failed. Logged, never fatal.
#[derive(Debug, Error)]
#[error("Upload of {artifact} to {remote} failed: {source}")]
pub struct UploadError {
    pub artifact: String,
    pub remote: String,
    #[source]
    pub source: ToolError,
}

/// Deleting or listing an artifact during a retention sweep failed.
/// Collected per artifact, never raised.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Removing a local artifact failed
    #[error("Failed to delete local artifact {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing a remote artifact failed
    #[error("Failed to delete remote artifact {name}: {source}")]
    Remote {
        name: String,
        #[source]
        source: ToolError,
    },

    /// The local directory could not be listed
    #[error("Failed to list local artifacts in {}: {source}", dir.display())]
    LocalListing {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote could not be listed
    #[error("Failed to list remote artifacts: {0}")]
    RemoteListing(#[source] ToolError),
}

/// Restoring the datastore failed. Nothing was applied, except as
/// reported by `Partial`.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// Neither the local directory nor the remote held an artifact
    #[error("No backup found in {}", dir.display())]
    NoBackupFound { dir: PathBuf },

    /// Could not open a connection to the datastore
    #[error("Failed to connect to {engine} datastore: {reason}")]
    Connect { engine: Engine, reason: String },

    /// The empty-datastore probe failed
    #[error("Catalog probe failed: {reason}")]
    Catalog { reason: String },

    /// A replayed statement failed; the transaction was rolled back
    #[error("Statement #{index} failed: {reason}")]
    Statement {
        index: usize,
        statement: String,
        reason: String,
    },

    /// Every statement succeeded but the commit did not
    #[error("Failed to commit restore transaction: {reason}")]
    Commit { reason: String },

    /// The artifact could not be read or decompressed
    #[error("Failed to read artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Replay exceeded its deadline; the transaction was rolled back
    #[error("Restore timed out after {after:?}")]
    TimedOut { after: Duration },

    /// Replay was cancelled; the transaction was rolled back
    #[error("Restore cancelled")]
    Cancelled,

    /// Another backup or restore holds the datastore
    #[error("Cannot restore while a {operation} is running")]
    Busy { operation: Operation },

    /// The blocking replay worker panicked or was aborted
    #[error("Restore worker failed: {0}")]
    Worker(String),

    /// Replay failed after schema statements had committed implicitly, and
    /// the datastore could not be brought back to its prior table set
    #[error("Restore failed with schema changes left behind ({} tables): {cause}", leftover.len())]
    Partial {
        #[source]
        cause: Box<RestoreError>,
        leftover: Vec<String>,
    },
}

impl RestoreError {
    /// Build a statement failure, keeping only an excerpt of the statement
    pub fn statement(index: usize, statement: &str, reason: impl Into<String>) -> Self {
        RestoreError::Statement {
            index,
            statement: excerpt(statement, STATEMENT_EXCERPT_CHARS),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used by the admin surface
    pub fn kind(&self) -> &'static str {
        match self {
            RestoreError::NoBackupFound { .. } => "no_backup_found",
            RestoreError::Connect { .. } => "connect",
            RestoreError::Catalog { .. } => "catalog",
            RestoreError::Statement { .. } => "statement",
            RestoreError::Commit { .. } => "commit",
            RestoreError::Artifact { .. } => "artifact",
            RestoreError::TimedOut { .. } => "timed_out",
            RestoreError::Cancelled => "cancelled",
            RestoreError::Busy { .. } => "busy",
            RestoreError::Worker(_) => "worker",
            RestoreError::Partial { .. } => "partial",
        }
    }
}

/// A backup run failed before an artifact was produced
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    /// Another backup or restore holds the datastore
    #[error("Backup already running ({operation} in progress)")]
    Busy { operation: Operation },
}

impl BackupError {
    /// Short machine-readable kind, used by the admin surface
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "config",
            BackupError::Dump(_) => "dump",
            BackupError::Busy { .. } => "busy",
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

/// Truncate `text` to at most `max_chars` characters, marking the cut
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_keeps_short_statement() {
        let err = RestoreError::statement(3, "INSERT INTO t VALUES (1);", "duplicate key");
        match err {
            RestoreError::Statement {
                index, statement, ..
            } => {
                assert_eq!(index, 3);
                assert_eq!(statement, "INSERT INTO t VALUES (1);");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_statement_error_truncates_long_statement() {
        let long = "é".repeat(STATEMENT_EXCERPT_CHARS + 50);
        let err = RestoreError::statement(0, &long, "boom");
        if let RestoreError::Statement { statement, .. } = err {
            assert!(statement.ends_with("..."));
            assert_eq!(statement.chars().count(), STATEMENT_EXCERPT_CHARS + 3);
        } else {
            panic!("expected statement error");
        }
    }

    #[test]
    fn test_tool_failure_message() {
        let err = ToolError::Failed {
            program: "rclone".to_string(),
            code: Some(3),
            stderr: "directory not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "'rclone' exited with exit code 3: directory not found"
        );
    }

    #[test]
    fn test_busy_message_mentions_backup() {
        let err = BackupError::Busy {
            operation: Operation::Backup,
        };
        assert!(err.to_string().contains("Backup already running"));
        assert_eq!(err.kind(), "busy");
    }

    #[test]
    fn test_partial_restore_names_cause() {
        let err = RestoreError::Partial {
            cause: Box::new(RestoreError::statement(7, "INSERT INTO t VALUES (1);", "duplicate key")),
            leftover: vec!["t".to_string()],
        };
        assert_eq!(err.kind(), "partial");
        assert_eq!(
            err.to_string(),
            "Restore failed with schema changes left behind (1 tables): Statement #7 failed: duplicate key"
        );
    }
}
