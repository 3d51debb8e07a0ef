use std::sync::atomic::Ordering;

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use strongbox_core::{DatastoreConnectionInfo, Engine, RestoreError};

use super::{InterruptOnDrop, USER_OBJECTS, is_interrupted, open};
use crate::datastore::{ReplaySummary, RestoreTarget};
use crate::replay::StatementFeed;

#[derive(Debug, Clone)]
pub struct SqliteRestoreTarget {
    info: DatastoreConnectionInfo,
}

impl SqliteRestoreTarget {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self { info }
    }

    /// Opens read-write, creating the file when it does not exist yet
    fn connect(&self) -> Result<Connection, RestoreError> {
        open(
            &self.info,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|reason| RestoreError::Connect {
            engine: Engine::Sqlite,
            reason,
        })
    }
}

fn worker_error(e: tokio::task::JoinError) -> RestoreError {
    RestoreError::Worker(format!("SQLite restore worker failed: {e}"))
}

#[async_trait]
impl RestoreTarget for SqliteRestoreTarget {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn count_base_tables(&self) -> Result<u64, RestoreError> {
        let catalog_error = |reason: String| RestoreError::Catalog { reason };
        let Some(path) = self.info.sqlite_path() else {
            return Err(catalog_error("Datastore is not a SQLite file".to_string()));
        };
        // A file that does not exist yet holds no tables and is not created here
        match tokio::fs::try_exists(path).await {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => return Err(catalog_error(e.to_string())),
        }

        let conn = open(
            &self.info,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(catalog_error)?;
        tokio::task::spawn_blocking(move || {
            let sql = format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND {USER_OBJECTS}"
            );
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map(|count| u64::try_from(count).unwrap_or_default())
                .map_err(|e| RestoreError::Catalog {
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(worker_error)?
    }

    async fn replay(&self, mut feed: StatementFeed) -> Result<ReplaySummary, RestoreError> {
        let conn = self.connect()?;
        let guard = InterruptOnDrop::new(&conn);
        let stopped = guard.flag();

        let result = tokio::task::spawn_blocking(move || {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RestoreError::Connect {
                    engine: Engine::Sqlite,
                    reason: e.to_string(),
                })?;

            let mut index = 0usize;
            while let Some(statement) = feed.blocking_next() {
                if stopped.load(Ordering::SeqCst) {
                    return Err(RestoreError::Cancelled);
                }
                let statement = statement?;
                index += 1;
                tx.execute_batch(&statement).map_err(|e| {
                    if is_interrupted(&e) {
                        RestoreError::Cancelled
                    } else {
                        RestoreError::statement(index, &statement, e.to_string())
                    }
                })?;
            }

            tx.commit().map_err(|e| RestoreError::Commit {
                reason: e.to_string(),
            })?;
            tracing::debug!(statements = index, artifact = %feed.path().display(), "SQLite replay committed");
            Ok(ReplaySummary { statements: index })
        })
        .await;
        guard.disarm();

        result.map_err(worker_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(dir: &tempfile::TempDir) -> (SqliteRestoreTarget, std::path::PathBuf) {
        let path = dir.path().join("app.db");
        let info = DatastoreConnectionInfo::parse(&format!("sqlite:{}", path.display())).unwrap();
        (SqliteRestoreTarget::new(info), path)
    }

    #[tokio::test]
    async fn test_missing_file_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (target, path) = target(&dir);
        assert_eq!(target.count_base_tables().await.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (target, path) = target(&dir);

        let feed = StatementFeed::from_statements([
            "CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT);".to_string(),
            "INSERT INTO members (id, name) VALUES (1, 'Ada');".to_string(),
            "INSERT INTO nowhere VALUES (1);".to_string(),
        ]);
        let error = target.replay(feed).await.unwrap_err();
        match error {
            RestoreError::Statement { index, .. } => assert_eq!(index, 3),
            other => panic!("unexpected error: {other:?}"),
        }

        let conn = Connection::open(&path).unwrap();
        let tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[tokio::test]
    async fn test_replay_commits() {
        let dir = tempfile::tempdir().unwrap();
        let (target, _) = target(&dir);

        let feed = StatementFeed::from_statements([
            "CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT);".to_string(),
            "INSERT INTO members (id, name) VALUES (1, 'O''Brien');".to_string(),
        ]);
        let summary = target.replay(feed).await.unwrap();
        assert_eq!(summary.statements, 2);
        assert_eq!(target.count_base_tables().await.unwrap(), 1);
    }
}
