use async_trait::async_trait;
use strongbox_core::{DatastoreConnectionInfo, Engine, RestoreError};

use super::{DEFAULT_SCHEMA, connect, error_detail};
use crate::datastore::{ReplaySummary, RestoreTarget};
use crate::replay::StatementFeed;

const COUNT_BASE_TABLES: &str = "SELECT COUNT(*) FROM information_schema.tables \
     WHERE table_schema = $1::text AND table_type = 'BASE TABLE'";

#[derive(Debug, Clone)]
pub struct PostgresRestoreTarget {
    info: DatastoreConnectionInfo,
}

impl PostgresRestoreTarget {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self { info }
    }

    async fn client(&self) -> Result<tokio_postgres::Client, RestoreError> {
        connect(&self.info)
            .await
            .map_err(|reason| RestoreError::Connect {
                engine: Engine::Postgresql,
                reason,
            })
    }
}

#[async_trait]
impl RestoreTarget for PostgresRestoreTarget {
    fn engine(&self) -> Engine {
        Engine::Postgresql
    }

    async fn count_base_tables(&self) -> Result<u64, RestoreError> {
        let client = self.client().await?;
        let row = client
            .query_one(COUNT_BASE_TABLES, &[&DEFAULT_SCHEMA])
            .await
            .map_err(|e| RestoreError::Catalog {
                reason: error_detail(&e),
            })?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn replay(&self, mut feed: StatementFeed) -> Result<ReplaySummary, RestoreError> {
        let mut client = self.client().await?;
        // Dropping an uncommitted transaction rolls it back
        let tx = client.transaction().await.map_err(|e| RestoreError::Connect {
            engine: Engine::Postgresql,
            reason: error_detail(&e),
        })?;

        let mut index = 0usize;
        while let Some(statement) = feed.next().await {
            let statement = statement?;
            index += 1;
            tx.batch_execute(&statement)
                .await
                .map_err(|e| RestoreError::statement(index, &statement, error_detail(&e)))?;
        }

        tx.commit().await.map_err(|e| RestoreError::Commit {
            reason: error_detail(&e),
        })?;
        tracing::debug!(statements = index, artifact = %feed.path().display(), "PostgreSQL replay committed");
        Ok(ReplaySummary { statements: index })
    }
}
