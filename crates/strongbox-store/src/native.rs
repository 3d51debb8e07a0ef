//! Dumps produced by the engine's own export tool.
//!
//! `pg_dump` and `mysqldump` write SQL to stdout; the output is streamed
//! through gzip into a `.sql.gz` artifact. Passwords travel through the
//! tool's environment variable, never the argument vector.

use std::path::Path;

use async_trait::async_trait;
use strongbox_core::{
    ArtifactFormat, CancelSignal, DatastoreConnectionInfo, DumpError, DumpMode, Engine,
    ToolCommand,
};
use tokio::io::AsyncReadExt;

use crate::strategy::{DumpStats, DumpStrategy};
use crate::writer::ArtifactWriter;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct NativeDump {
    info: DatastoreConnectionInfo,
}

impl NativeDump {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self { info }
    }

    /// The export command for the configured engine
    pub fn command(&self) -> Result<ToolCommand, DumpError> {
        let info = &self.info;
        let port = info.port.to_string();
        let (command, password_var) = match info.engine {
            Engine::Postgresql => {
                let mut command = ToolCommand::new("pg_dump").args([
                    "--inserts",
                    "--no-owner",
                    "--no-privileges",
                    "--clean",
                    "--if-exists",
                    "--host",
                    info.host.as_str(),
                    "--port",
                    port.as_str(),
                ]);
                if let Some(user) = info.username() {
                    command = command.args(["--username", user]);
                }
                (command.arg(&info.database), "PGPASSWORD")
            }
            Engine::Mysql => {
                let mut command = ToolCommand::new("mysqldump").args([
                    "--single-transaction",
                    "--skip-add-locks",
                    "--no-tablespaces",
                    "--host",
                    info.host.as_str(),
                    "--port",
                    port.as_str(),
                ]);
                if let Some(user) = info.username() {
                    command = command.args(["--user", user]);
                }
                (command.arg(&info.database), "MYSQL_PWD")
            }
            Engine::Sqlite => {
                return Err(DumpError::Query {
                    context: "native export".to_string(),
                    reason: "sqlite has no native export tool configured".to_string(),
                });
            }
        };

        Ok(match info.password() {
            Some(password) => command.secret_env(password_var, password.clone()),
            None => command,
        })
    }
}

#[async_trait]
impl DumpStrategy for NativeDump {
    fn engine(&self) -> Engine {
        self.info.engine
    }

    fn mode(&self) -> DumpMode {
        DumpMode::Native
    }

    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::SqlGz
    }

    async fn dump(&self, target: &Path, cancel: &CancelSignal) -> Result<DumpStats, DumpError> {
        let command = self.command()?;
        let mut writer = ArtifactWriter::create(target, ArtifactFormat::SqlGz)?;

        let mut running = command.spawn_streaming()?;
        let mut stdout = running.child.stdout.take().ok_or_else(|| {
            DumpError::Worker(format!("{} stdout was not captured", command.program()))
        })?;

        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            let read = stdout.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            writer.raw(&chunk[..read])?;
        }

        running.finish().await?;
        let size = writer.finish_blocking().await?;
        tracing::debug!(
            program = command.program(),
            artifact = %target.display(),
            size_bytes = size,
            "Native export finished"
        );
        Ok(DumpStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_core::SecretString;

    #[test]
    fn test_pg_dump_arguments() {
        let info = DatastoreConnectionInfo::parse("postgres://app:pw@db:5433/community").unwrap();
        let command = NativeDump::new(info).command().unwrap();
        assert_eq!(command.program(), "pg_dump");
        assert_eq!(
            command.arguments(),
            [
                "--inserts",
                "--no-owner",
                "--no-privileges",
                "--clean",
                "--if-exists",
                "--host",
                "db",
                "--port",
                "5433",
                "--username",
                "app",
                "community",
            ]
        );
        assert!(!command.arguments().iter().any(|a| a.contains("pw")));
    }

    #[test]
    fn test_mysqldump_arguments() {
        let info = DatastoreConnectionInfo::parse("jdbc:mysql://db/community")
            .unwrap()
            .with_credentials(
                Some("root".to_string()),
                Some(SecretString::from_string("secret".to_string())),
            );
        let command = NativeDump::new(info).command().unwrap();
        assert_eq!(command.program(), "mysqldump");
        assert_eq!(
            command.arguments(),
            [
                "--single-transaction",
                "--skip-add-locks",
                "--no-tablespaces",
                "--host",
                "db",
                "--port",
                "3306",
                "--user",
                "root",
                "community",
            ]
        );
        assert!(!format!("{command:?}").contains("secret"));
    }

    #[test]
    fn test_sqlite_has_no_native_tool() {
        let info = DatastoreConnectionInfo::parse("sqlite:app.db").unwrap();
        assert!(NativeDump::new(info).command().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_tool_leaves_no_artifact() {
        // Points pg_dump at a port nothing listens on, when pg_dump exists;
        // a missing binary fails at spawn. Either way nothing is written.
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("backup_20240101_000000.sql.gz");
        let info = DatastoreConnectionInfo::parse("postgres://nobody@127.0.0.1:1/none").unwrap();

        let result = NativeDump::new(info)
            .dump(&target, &CancelSignal::never())
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
