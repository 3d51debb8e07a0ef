//! Back up a real SQLite datastore, lose it, and let the startup hook
//! bring it back.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use strongbox_core::{CancelSignal, StrongboxConfigBuilder, ToolError};
use strongbox_runtime::{RestoreState, StartupOutcome, Strongbox};
use strongbox_store::{DumpRegistry, RemoteEntry, RemoteTarget, SyncTool, restore_target_for};
use tempfile::TempDir;

/// Remote that is never reachable
#[derive(Debug)]
struct OfflineRemote;

fn offline() -> ToolError {
    ToolError::Failed {
        program: "rclone".to_string(),
        code: Some(1),
        stderr: "dial tcp: lookup remote: no such host".to_string(),
    }
}

#[async_trait]
impl SyncTool for OfflineRemote {
    async fn copy_to(&self, _: &Path, _: &RemoteTarget, _: &CancelSignal) -> Result<(), ToolError> {
        Err(offline())
    }

    async fn copy_from(
        &self,
        _: &RemoteTarget,
        _: &Path,
        _: &[&str],
        _: &CancelSignal,
    ) -> Result<(), ToolError> {
        Err(offline())
    }

    async fn list(&self, _: &RemoteTarget, _: &CancelSignal) -> Result<Vec<RemoteEntry>, ToolError> {
        Err(offline())
    }

    async fn delete_file(&self, _: &RemoteTarget, _: &str, _: &CancelSignal) -> Result<(), ToolError> {
        Err(offline())
    }
}

fn open_strongbox(dir: &TempDir) -> Strongbox {
    let config = StrongboxConfigBuilder::new()
        .database_url(format!("sqlite:{}", dir.path().join("app.db").display()))
        .local_dir(dir.path().join("backups"))
        .remote("offsite", "strongbox")
        .retention_days(7)
        .schedule("0 3 * * *")
        .build()
        .unwrap();
    let registry = DumpRegistry::for_datastore(&config.datastore, config.dump_mode);
    let target = restore_target_for(&config.datastore).unwrap();
    Strongbox::assemble(Arc::new(config), registry, Arc::new(OfflineRemote), target)
}

#[tokio::test]
async fn test_lost_datastore_is_restored_on_startup() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("app.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT UNIQUE NOT NULL);
             CREATE TABLE sessions (
                 id INTEGER PRIMARY KEY,
                 account_id INTEGER NOT NULL REFERENCES accounts(id),
                 token TEXT
             );
             INSERT INTO accounts (email) VALUES ('ops@example.org'), ('dev@example.org');
             INSERT INTO sessions (account_id, token) VALUES (2, 'abc;def');",
        )
        .unwrap();
    }

    let first = open_strongbox(&dir);
    assert_eq!(first.restore.state().await.unwrap(), RestoreState::Initialized);
    let report = first.backup.backup_now().await.unwrap();
    assert_eq!(report.stats.tables, 2);
    assert_eq!(report.stats.rows, 3);
    assert!(!report.uploaded);
    assert_eq!(
        first.startup.run().await,
        StartupOutcome::AlreadyInitialized
    );
    drop(first);

    std::fs::remove_file(&db).unwrap();

    let second = open_strongbox(&dir);
    assert!(second.restore.is_empty().await.unwrap());
    match second.startup.run().await {
        StartupOutcome::Restored { artifact, statements } => {
            assert_eq!(artifact, report.artifact.name);
            assert!(statements > 3);
        }
        other => panic!("expected a restore, got {other:?}"),
    }

    let conn = Connection::open(&db).unwrap();
    let emails: Vec<String> = conn
        .prepare("SELECT email FROM accounts ORDER BY id")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(emails, vec!["ops@example.org", "dev@example.org"]);
    let token: String = conn
        .query_row("SELECT token FROM sessions WHERE account_id = 2", [], |row| row.get(0))
        .unwrap();
    assert_eq!(token, "abc;def");
}
