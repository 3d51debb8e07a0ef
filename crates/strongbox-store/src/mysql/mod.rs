//! MySQL and MariaDB restore through `sqlx`.
//!
//! MySQL dumps always use the native export tool, so only the restore half
//! lives here. DDL statements commit implicitly on MySQL, so the replay runs
//! with autocommit off and, on failure, drops every table it created. When a
//! table that existed before the replay may have been rewritten, the failure
//! is reported as `RestoreError::Partial`.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Executor};
use strongbox_core::{DatastoreConnectionInfo, Engine, RestoreError};

use crate::datastore::{ReplaySummary, RestoreTarget};
use crate::replay::StatementFeed;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const COUNT_BASE_TABLES: &str = "SELECT COUNT(*) FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'";

const LIST_BASE_TABLES: &str = "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'";

/// Statement prefixes that end the open transaction on MySQL
const IMPLICIT_COMMIT_PREFIXES: [&str; 7] = [
    "CREATE", "DROP", "ALTER", "TRUNCATE", "RENAME", "LOCK", "UNLOCK",
];

#[derive(Debug, Clone)]
pub struct MysqlRestoreTarget {
    info: DatastoreConnectionInfo,
}

impl MysqlRestoreTarget {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self { info }
    }

    fn options(&self) -> MySqlConnectOptions {
        let info = &self.info;
        let mut options = MySqlConnectOptions::new()
            .host(&info.host)
            .port(info.port)
            .database(&info.database);
        if let Some(user) = info.username() {
            options = options.username(user);
        }
        if let Some(password) = info.password() {
            options = options.password(password.expose_as_str());
        }
        options
    }

    async fn connect(&self) -> Result<MySqlConnection, RestoreError> {
        let connect_error = |reason: String| RestoreError::Connect {
            engine: Engine::Mysql,
            reason,
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, self.options().connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(connect_error(sanitize_error(&e))),
            Err(_) => Err(connect_error("Connection timed out".to_string())),
        }
    }
}

/// Connection failures without server text
fn sanitize_error(error: &sqlx::Error) -> String {
    match error {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => format!("Database rejected the connection (code {code})"),
            None => "Database rejected the connection".to_string(),
        },
        sqlx::Error::Io(_) => "Connection failed".to_string(),
        sqlx::Error::Tls(_) => "TLS negotiation failed".to_string(),
        sqlx::Error::PoolTimedOut => "Connection timed out".to_string(),
        _ => "Database error occurred".to_string(),
    }
}

fn error_detail(error: &sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db) => match db.code() {
            Some(code) => format!("{} (code {code})", db.message()),
            None => db.message().to_string(),
        },
        None => error.to_string(),
    }
}

#[async_trait]
impl RestoreTarget for MysqlRestoreTarget {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    async fn count_base_tables(&self) -> Result<u64, RestoreError> {
        let mut conn = self.connect().await?;
        let count: i64 = sqlx::query_scalar(COUNT_BASE_TABLES)
            .fetch_one(&mut conn)
            .await
            .map_err(|e| RestoreError::Catalog {
                reason: error_detail(&e),
            })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn replay(&self, mut feed: StatementFeed) -> Result<ReplaySummary, RestoreError> {
        let mut conn = self.connect().await?;
        let before = list_base_tables(&mut conn)
            .await
            .map_err(|e| RestoreError::Catalog {
                reason: error_detail(&e),
            })?;

        let mut progress = ReplayProgress::default();
        match replay_on(&mut conn, &mut feed, &mut progress).await {
            Ok(()) => {
                tracing::debug!(
                    statements = progress.statements,
                    artifact = %feed.path().display(),
                    "MySQL replay committed"
                );
                Ok(ReplaySummary {
                    statements: progress.statements,
                })
            }
            Err(cause) if !progress.schema_changed => Err(cause),
            Err(cause) => Err(undo_schema_changes(&mut conn, &before, cause).await),
        }
    }
}

#[derive(Debug, Default)]
struct ReplayProgress {
    statements: usize,
    schema_changed: bool,
}

/// Run every statement with autocommit off; rows roll back on failure
async fn replay_on(
    conn: &mut MySqlConnection,
    feed: &mut StatementFeed,
    progress: &mut ReplayProgress,
) -> Result<(), RestoreError> {
    conn.execute(sqlx::raw_sql("SET autocommit = 0"))
        .await
        .map_err(|e| RestoreError::Connect {
            engine: Engine::Mysql,
            reason: error_detail(&e),
        })?;

    while let Some(statement) = feed.next().await {
        let statement = match statement {
            Ok(statement) => statement,
            Err(e) => {
                rollback(conn).await;
                return Err(e);
            }
        };
        progress.statements += 1;
        progress.schema_changed |= commits_implicitly(&statement);
        if let Err(e) = conn.execute(sqlx::raw_sql(&statement)).await {
            rollback(conn).await;
            return Err(RestoreError::statement(
                progress.statements,
                &statement,
                error_detail(&e),
            ));
        }
    }

    conn.execute(sqlx::raw_sql("COMMIT"))
        .await
        .map_err(|e| RestoreError::Commit {
            reason: error_detail(&e),
        })?;
    Ok(())
}

async fn rollback(conn: &mut MySqlConnection) {
    if let Err(e) = conn.execute(sqlx::raw_sql("ROLLBACK")).await {
        tracing::warn!(error = %error_detail(&e), "MySQL rollback failed");
    }
}

async fn list_base_tables(conn: &mut MySqlConnection) -> Result<BTreeSet<String>, sqlx::Error> {
    let names: Vec<String> = sqlx::query_scalar(LIST_BASE_TABLES)
        .fetch_all(&mut *conn)
        .await?;
    Ok(names.into_iter().collect())
}

/// Drop the tables the failed replay created
async fn undo_schema_changes(
    conn: &mut MySqlConnection,
    before: &BTreeSet<String>,
    cause: RestoreError,
) -> RestoreError {
    let after = match list_base_tables(conn).await {
        Ok(after) => after,
        Err(e) => {
            tracing::error!(error = %error_detail(&e), "Could not list tables after failed replay");
            return RestoreError::Partial {
                cause: Box::new(cause),
                leftover: Vec::new(),
            };
        }
    };

    let mut leftover = Vec::new();
    if let Err(e) = conn.execute(sqlx::raw_sql("SET FOREIGN_KEY_CHECKS = 0"))
        .await
    {
        tracing::warn!(error = %error_detail(&e), "Could not disable foreign key checks");
    }
    for table in created_tables(before, &after) {
        let statement = format!("DROP TABLE IF EXISTS {}", quote_mysql_ident(&table));
        match conn.execute(sqlx::raw_sql(&statement)).await {
            Ok(_) => tracing::info!(%table, "Dropped table created by failed replay"),
            Err(e) => {
                tracing::error!(%table, error = %error_detail(&e), "Could not drop table");
                leftover.push(table);
            }
        }
    }

    // Tables present before the replay may have been dropped or rebuilt
    if leftover.is_empty() && before.is_empty() {
        cause
    } else {
        RestoreError::Partial {
            cause: Box::new(cause),
            leftover,
        }
    }
}

fn commits_implicitly(statement: &str) -> bool {
    let keyword = statement
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    IMPLICIT_COMMIT_PREFIXES
        .iter()
        .any(|prefix| keyword.eq_ignore_ascii_case(prefix))
}

fn created_tables(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<String> {
    after.difference(before).cloned().collect()
}

/// Backtick-quote an identifier, doubling embedded backticks
fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
