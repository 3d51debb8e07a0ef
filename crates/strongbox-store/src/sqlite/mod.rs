//! SQLite dump and restore through `rusqlite`.
//!
//! rusqlite is synchronous, so both halves run on the blocking pool. The
//! awaiting future owns an [`InterruptOnDrop`]; if it is dropped on a
//! deadline or cancellation, the worker is interrupted and stops at its
//! next statement or row.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, InterruptHandle, OpenFlags};
use strongbox_core::DatastoreConnectionInfo;

mod dump;
mod restore;

pub use dump::SqliteDriverDump;
pub use restore::SqliteRestoreTarget;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Filters SQLite's own bookkeeping objects out of `sqlite_master` queries
pub(crate) const USER_OBJECTS: &str = r"name NOT LIKE 'sqlite\_%' ESCAPE '\'";

pub(crate) fn open(info: &DatastoreConnectionInfo, flags: OpenFlags) -> Result<Connection, String> {
    let path = info
        .sqlite_path()
        .ok_or_else(|| "Datastore is not a SQLite file".to_string())?;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| sanitize_error(&e))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| sanitize_error(&e))?;
    Ok(conn)
}

fn sanitize_error(error: &rusqlite::Error) -> String {
    match error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::CannotOpen => "Unable to open database file".to_string(),
            ErrorCode::NotADatabase => "File is not a database".to_string(),
            ErrorCode::PermissionDenied | ErrorCode::ReadOnly => {
                "Permission denied".to_string()
            }
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                "Database is locked".to_string()
            }
            _ => "Database operation failed".to_string(),
        },
        rusqlite::Error::InvalidPath(_) => "Invalid database path".to_string(),
        _ => "Database error occurred".to_string(),
    }
}

pub(crate) fn is_interrupted(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::OperationInterrupted
    )
}

/// Stops a blocking worker when the future awaiting it goes away
pub(crate) struct InterruptOnDrop {
    handle: InterruptHandle,
    stopped: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            handle: conn.get_interrupt_handle(),
            stopped: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    /// Flag the worker polls between statements
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.stopped.store(true, Ordering::SeqCst);
            self.handle.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("absent.db").display());
        let info = DatastoreConnectionInfo::parse(&url).unwrap();
        let error = open(&info, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap_err();
        assert_eq!(error, "Unable to open database file");
    }

    #[test]
    fn test_guard_sets_flag_on_drop() {
        let conn = Connection::open_in_memory().unwrap();
        let guard = InterruptOnDrop::new(&conn);
        let flag = guard.flag();
        drop(guard);
        assert!(flag.load(Ordering::SeqCst));

        let guard = InterruptOnDrop::new(&conn);
        let flag = guard.flag();
        guard.disarm();
        assert!(!flag.load(Ordering::SeqCst));
    }
}
