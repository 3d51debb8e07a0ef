//! # Strongbox Store
//!
//! Everything that touches a datastore or an artifact file: dump
//! strategies, restore targets, the statement reader used for replay and
//! the [`ArtifactStore`] that owns the local directory and its remote
//! replica.
//!
//! ## Feature Flags
//!
//! - `postgres`: driver dump and restore through `tokio-postgres`
//! - `mysql`: restore through `sqlx` (dumps use `mysqldump`)
//! - `sqlite`: driver dump and restore through `rusqlite`
//!
//! All three are enabled by default. The native-tool dump needs no
//! feature; it only needs `pg_dump` or `mysqldump` on the `PATH`.
//!
//! ## Example
//!
//! ```rust
//! use strongbox_store::StatementReader;
//!
//! let artifact = "-- header\nCREATE TABLE t (a INT);\nINSERT INTO t VALUES\n  (1);\n";
//! let statements: Vec<String> = StatementReader::new(artifact.as_bytes())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(statements, ["CREATE TABLE t (a INT);", "INSERT INTO t VALUES\n(1);"]);
//! ```

pub mod artifact_store;
pub mod datastore;
pub mod native;
pub mod replay;
pub mod sql;
pub mod strategy;
pub mod sync;
pub mod writer;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use artifact_store::ArtifactStore;
pub use datastore::{ReplaySummary, RestoreTarget, restore_target_for};
pub use native::NativeDump;
pub use replay::{StatementFeed, StatementReader, open_artifact};
pub use strategy::{DumpRegistry, DumpStats, DumpStrategy};
pub use sync::{Rclone, RemoteEntry, RemoteTarget, SyncTool};
pub use writer::ArtifactWriter;

#[cfg(feature = "mysql")]
pub use mysql::MysqlRestoreTarget;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresDriverDump, PostgresRestoreTarget};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDriverDump, SqliteRestoreTarget};
