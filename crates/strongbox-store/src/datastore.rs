//! Restore targets: the engine-specific half of a restore.

use std::sync::Arc;

use async_trait::async_trait;
use strongbox_core::{ConfigError, DatastoreConnectionInfo, Engine, RestoreError};

use crate::replay::StatementFeed;

/// Outcome of a committed replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub statements: usize,
}

/// A datastore that can be probed for emptiness and replayed into.
///
/// `replay` must apply either every statement or none: it runs the whole
/// feed inside one transaction and commits only after the feed is
/// exhausted. Dropping the returned future before it resolves must roll
/// back.
#[async_trait]
pub trait RestoreTarget: Send + Sync {
    fn engine(&self) -> Engine;

    /// Number of base tables in the default schema
    async fn count_base_tables(&self) -> Result<u64, RestoreError>;

    async fn replay(&self, feed: StatementFeed) -> Result<ReplaySummary, RestoreError>;
}

/// The restore target for the configured datastore
pub fn restore_target_for(
    info: &DatastoreConnectionInfo,
) -> Result<Arc<dyn RestoreTarget>, ConfigError> {
    match info.engine {
        #[cfg(feature = "postgres")]
        Engine::Postgresql => Ok(Arc::new(crate::postgres::PostgresRestoreTarget::new(
            info.clone(),
        ))),
        #[cfg(feature = "mysql")]
        Engine::Mysql => Ok(Arc::new(crate::mysql::MysqlRestoreTarget::new(info.clone()))),
        #[cfg(feature = "sqlite")]
        Engine::Sqlite => Ok(Arc::new(crate::sqlite::SqliteRestoreTarget::new(
            info.clone(),
        ))),
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::UnsupportedEngine {
            engine: format!("{other} (support not compiled in)"),
        }),
    }
}
