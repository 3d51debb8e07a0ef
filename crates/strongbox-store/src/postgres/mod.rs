//! PostgreSQL dump and restore through `tokio-postgres`.

use std::time::Duration;

use strongbox_core::DatastoreConnectionInfo;
use tokio_postgres::{Client, Config, Error as PgError, NoTls};

mod catalog;
mod dump;
mod restore;

pub use dump::PostgresDriverDump;
pub use restore::PostgresRestoreTarget;

/// Schema that is dumped, probed and restored
pub const DEFAULT_SCHEMA: &str = "public";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_pg_config(info: &DatastoreConnectionInfo) -> Config {
    let mut config = Config::new();
    config
        .host(&info.host)
        .port(info.port)
        .dbname(&info.database)
        .application_name("strongbox")
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(user) = info.username() {
        config.user(user);
    }
    if let Some(password) = info.password() {
        config.password(password.expose_as_str());
    }
    config
}

/// Open a dedicated connection and check it answers
pub(crate) async fn connect(info: &DatastoreConnectionInfo) -> Result<Client, String> {
    let (client, connection) = build_pg_config(info)
        .connect(NoTls)
        .await
        .map_err(|e| sanitize_error(&e))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %sanitize_error(&e), "PostgreSQL connection error");
        }
    });

    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| sanitize_error(&e))?;
    Ok(client)
}

/// Connection failures are reported without echoing server text, which may
/// include the role name or connection parameters
fn sanitize_error(error: &PgError) -> String {
    if let Some(db) = error.as_db_error() {
        return format!("Database rejected the connection (SQLSTATE {})", db.code().code());
    }
    let text = error.to_string();
    if text.contains("password") || text.contains("authentication") {
        "Authentication failed".to_string()
    } else if text.contains("timeout") || text.contains("timed out") {
        "Connection timed out".to_string()
    } else if text.contains("connection") || text.contains("connect") {
        "Connection failed".to_string()
    } else {
        "Database error occurred".to_string()
    }
}

/// Full detail for statement failures during dump or replay
fn error_detail(error: &PgError) -> String {
    match error.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_carries_credentials() {
        let info =
            DatastoreConnectionInfo::parse("postgres://backup:pw@db.internal:6543/community")
                .unwrap();
        let config = build_pg_config(&info);
        assert_eq!(config.get_user(), Some("backup"));
        assert_eq!(config.get_password(), Some(b"pw".as_slice()));
        assert_eq!(config.get_dbname(), Some("community"));
        assert_eq!(config.get_ports(), &[6543]);
        assert_eq!(config.get_application_name(), Some("strongbox"));
    }
}
