//! Dump a populated SQLite file and replay it into empty and populated targets.

#[cfg(feature = "sqlite")]
mod sqlite_roundtrip_tests {
    use std::path::{Path, PathBuf};

    use rusqlite::Connection;
    use rusqlite::types::Value;
    use strongbox_core::{
        ArtifactFormat, CancelSignal, DatastoreConnectionInfo, DumpError, RestoreError,
        cancel_pair,
    };
    use strongbox_store::{
        ArtifactWriter, DumpStrategy, RestoreTarget, SqliteDriverDump, SqliteRestoreTarget,
        StatementFeed,
    };

    const SCHEMA: &str = "
        CREATE TABLE members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            bio TEXT,
            avatar BLOB,
            score REAL DEFAULT 0
        );
        CREATE TABLE events (
            id INTEGER PRIMARY KEY,
            member_id INTEGER NOT NULL REFERENCES members(id),
            title TEXT NOT NULL
        );
        CREATE TABLE audit (entry TEXT);
        CREATE UNIQUE INDEX events_title ON events (title);
        CREATE VIEW member_names AS SELECT name FROM members;
        CREATE TRIGGER events_audit AFTER INSERT ON events
        BEGIN
            INSERT INTO audit (entry) VALUES ('event ' || NEW.title);
        END;
    ";

    fn info(path: &Path) -> DatastoreConnectionInfo {
        DatastoreConnectionInfo::parse(&format!("sqlite:{}", path.display())).unwrap()
    }

    fn populated(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO members (name, bio, avatar, score) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params!["O'Brien", "line one\nline 'two'", vec![0u8, 159, 255], 2.5],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO members (name, bio, avatar, score) VALUES ('Ada', NULL, NULL, 3.0)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO members (name) VALUES ('Gone')", [])
            .unwrap();
        conn.execute("DELETE FROM members WHERE name = 'Gone'", [])
            .unwrap();
        conn.execute_batch(
            "INSERT INTO events (member_id, title) VALUES (1, 'Spring -- meetup');
             INSERT INTO events (member_id, title) VALUES (2, 'AGM; annual');",
        )
        .unwrap();
    }

    fn rows(path: &Path, sql: &str) -> Vec<Vec<Value>> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let columns = stmt.column_count();
        stmt.query_map([], |row| {
            (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .unwrap()
        .map(Result::unwrap)
        .collect()
    }

    fn snapshot(path: &Path) -> Vec<Vec<Vec<Value>>> {
        [
            "SELECT * FROM members ORDER BY id",
            "SELECT * FROM events ORDER BY id",
            "SELECT * FROM audit ORDER BY entry",
            "SELECT * FROM member_names ORDER BY name",
            "SELECT name, seq FROM sqlite_sequence ORDER BY name",
        ]
        .iter()
        .map(|sql| rows(path, sql))
        .collect()
    }

    async fn dump(source: &Path, dir: &Path) -> PathBuf {
        let artifact = dir.join("backup_20240101_030000.sql");
        let stats = SqliteDriverDump::new(info(source))
            .dump(&artifact, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(stats.tables, 3);
        assert_eq!(stats.rows, 6);
        artifact
    }

    async fn replay(target: &Path, artifact: &Path) -> Result<usize, RestoreError> {
        let feed = StatementFeed::spawn(artifact)?;
        let summary = SqliteRestoreTarget::new(info(target)).replay(feed).await?;
        Ok(summary.statements)
    }

    #[tokio::test]
    async fn test_roundtrip_into_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        populated(&source);
        let artifact = dump(&source, dir.path()).await;

        let text = std::fs::read_to_string(&artifact).unwrap();
        assert!(text.contains("'O''Brien'"));
        assert!(text.contains("'line one' || char(10) || 'line ''two'''"));
        assert!(text.contains("X'009FFF'"));
        assert!(text.contains("DELETE FROM \"members\";"));

        let target = dir.path().join("restored.db");
        let target_store = SqliteRestoreTarget::new(info(&target));
        assert_eq!(target_store.count_base_tables().await.unwrap(), 0);

        replay(&target, &artifact).await.unwrap();

        assert_eq!(target_store.count_base_tables().await.unwrap(), 3);
        assert_eq!(snapshot(&target), snapshot(&source));

        // AUTOINCREMENT continues past the deleted row
        let conn = Connection::open(&target).unwrap();
        conn.execute("INSERT INTO members (name) VALUES ('Next')", [])
            .unwrap();
        assert_eq!(conn.last_insert_rowid(), 4);
    }

    #[tokio::test]
    async fn test_replay_over_existing_data_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        populated(&source);
        let artifact = dump(&source, dir.path()).await;

        let target = dir.path().join("drifted.db");
        populated(&target);
        let conn = Connection::open(&target).unwrap();
        conn.execute_batch(
            "UPDATE members SET name = 'Changed' WHERE id = 1;
             INSERT INTO events (member_id, title) VALUES (1, 'Extra');",
        )
        .unwrap();
        drop(conn);

        replay(&target, &artifact).await.unwrap();
        assert_eq!(snapshot(&target), snapshot(&source));
    }

    #[tokio::test]
    async fn test_constraint_violation_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backup_20240101_030000.sql");
        std::fs::write(
            &artifact,
            "CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             INSERT INTO members (id, name) VALUES (1, 'Ada');\n\
             INSERT INTO members (id, name)\n  VALUES (1, 'Duplicate');\n",
        )
        .unwrap();

        let target = dir.path().join("restored.db");
        let error = replay(&target, &artifact).await.unwrap_err();
        match error {
            RestoreError::Statement {
                index, statement, ..
            } => {
                assert_eq!(index, 3);
                assert!(statement.contains("Duplicate"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            SqliteRestoreTarget::new(info(&target))
                .count_base_tables()
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_gzip_artifact_replays() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backup_20240101_030000.sql.gz");
        let mut writer = ArtifactWriter::create(&artifact, ArtifactFormat::SqlGz).unwrap();
        writer.comment("compressed").unwrap();
        writer
            .statement("CREATE TABLE notes (body TEXT);")
            .unwrap();
        writer
            .statement("INSERT INTO notes (body) VALUES ('O''Brien');")
            .unwrap();
        writer.finish().unwrap();

        let target = dir.path().join("restored.db");
        assert_eq!(replay(&target, &artifact).await.unwrap(), 2);
        assert_eq!(
            rows(&target, "SELECT body FROM notes"),
            [[Value::Text("O'Brien".to_string())]]
        );
    }

    #[tokio::test]
    async fn test_missing_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backup_20240101_030000.sql");
        let error = SqliteDriverDump::new(info(&dir.path().join("absent.db")))
            .dump(&artifact, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(error, DumpError::Connect { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_dump_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        populated(&source);

        let (trigger, signal) = cancel_pair();
        trigger.cancel();
        let artifact = dir.path().join("backup_20240101_030000.sql");
        let error = SqliteDriverDump::new(info(&source))
            .dump(&artifact, &signal)
            .await
            .unwrap_err();
        assert!(matches!(error, DumpError::Cancelled));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "source.db")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_tables_are_dumped_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        Connection::open(&source)
            .unwrap()
            .execute_batch(
                "CREATE TABLE zeta (id INTEGER PRIMARY KEY);
                 CREATE TABLE alpha (id INTEGER PRIMARY KEY, zeta_id INTEGER REFERENCES zeta(id));
                 INSERT INTO zeta (id) VALUES (7);
                 INSERT INTO alpha (id, zeta_id) VALUES (1, 7);",
            )
            .unwrap();

        let artifact = dir.path().join("backup_20240101_030000.sql");
        SqliteDriverDump::new(info(&source))
            .dump(&artifact, &CancelSignal::never())
            .await
            .unwrap();

        let text = std::fs::read_to_string(&artifact).unwrap();
        let alpha = text.find("-- Table: alpha").unwrap();
        let zeta = text.find("-- Table: zeta").unwrap();
        assert!(alpha < zeta);

        // The referencing table loads first
        let target = dir.path().join("restored.db");
        replay(&target, &artifact).await.unwrap();
        assert_eq!(
            rows(&target, "SELECT zeta_id FROM alpha"),
            vec![vec![Value::Integer(7)]]
        );
    }
}
