//! Subcommand implementations

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use strongbox_core::{
    BackupError, ConfigError, RestoreError, StrongboxConfig, StrongboxConfigBuilder,
};
use strongbox_http::AdminApi;
use strongbox_http::handlers::{ArtifactListing, BackupRunResponse, RestoreRunResponse};
use strongbox_runtime::{RestoreState, StartupOutcome, Strongbox};
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error("Admin server on {addr} failed: {source}")]
    Server {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list local artifacts: {0}")]
    Listing(#[source] std::io::Error),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Config(_) => "config",
            CliError::Backup(e) => e.kind(),
            CliError::Restore(e) => e.kind(),
            CliError::Server { .. } => "server",
            CliError::Listing(_) => "listing",
            CliError::Output(_) => "output",
        }
    }
}

/// Builder from the file when given, with environment variables on top
fn load_config(path: Option<&Path>) -> Result<StrongboxConfig, ConfigError> {
    let builder = match path {
        Some(path) => StrongboxConfigBuilder::from_file(path)?.with_env()?,
        None => StrongboxConfigBuilder::from_env()?,
    };
    builder.build()
}

fn open(path: Option<&Path>) -> Result<Strongbox, CliError> {
    let config = load_config(path)?;
    Ok(Strongbox::from_config(config)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_serve(config: Option<&Path>, addr: SocketAddr) -> Result<(), CliError> {
    let strongbox = Arc::new(open(config)?);

    // Runs to completion before the listener accepts anything
    match strongbox.startup.run().await {
        StartupOutcome::Failed { kind, message } => {
            tracing::warn!(%kind, %message, "Startup restore failed; serving anyway");
        }
        outcome => tracing::info!(?outcome, "Startup restore finished"),
    }

    let scheduler = strongbox.scheduler().spawn();

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Server { addr, source })?;
    tracing::info!(%addr, "Admin API listening");

    let served = axum::serve(listener, AdminApi::new(Arc::clone(&strongbox)).router())
        .with_graceful_shutdown(strongbox_http::shutdown_signal())
        .await;

    strongbox.shutdown();
    scheduler.shutdown().await;
    tracing::info!("Strongbox stopped");

    served.map_err(|source| CliError::Server { addr, source })
}

pub async fn run_backup(config: Option<&Path>) -> Result<(), CliError> {
    let strongbox = open(config)?;
    let report = strongbox.backup.backup_now().await?;
    print_json(&BackupRunResponse::from(report))
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum RestoreOutput {
    Skipped { restore_state: RestoreState },
    Restored(RestoreRunResponse),
}

pub async fn run_restore(
    config: Option<&Path>,
    if_empty: bool,
    artifact: Option<&Path>,
) -> Result<(), CliError> {
    let strongbox = open(config)?;

    if if_empty && !strongbox.restore.is_empty().await? {
        tracing::info!("Datastore already initialized; nothing restored");
        return print_json(&RestoreOutput::Skipped {
            restore_state: RestoreState::Initialized,
        });
    }

    let report = match artifact {
        Some(path) => strongbox.restore.restore_artifact(path).await?,
        None => strongbox.restore.restore_latest().await?,
    };
    print_json(&RestoreOutput::Restored(report.into()))
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    engine: String,
    datastore: String,
    dump_mode: String,
    restore_state: Option<RestoreState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restore_state_error: Option<String>,
    schedule: String,
    next_backup: Option<chrono::DateTime<Local>>,
    local_dir: String,
    remote: String,
    retention_days: u32,
    restore_on_startup: bool,
}

pub async fn run_status(config: Option<&Path>) -> Result<(), CliError> {
    let strongbox = open(config)?;
    let config = &strongbox.config;

    let (restore_state, restore_state_error) = match strongbox.restore.state().await {
        Ok(state) => (Some(state), None),
        Err(e) => (None, Some(e.to_string())),
    };

    print_json(&StatusOutput {
        engine: config.datastore.engine.to_string(),
        datastore: config.datastore.to_string(),
        dump_mode: config.dump_mode.to_string(),
        restore_state,
        restore_state_error,
        schedule: config.retention.schedule.to_string(),
        next_backup: config.retention.schedule.next_after(Local::now()),
        local_dir: config.retention.local_dir.display().to_string(),
        remote: config.retention.remote_target(),
        retention_days: config.retention.retention_days(),
        restore_on_startup: config.restore_on_startup,
    })
}

pub async fn run_artifacts(config: Option<&Path>) -> Result<(), CliError> {
    let strongbox = open(config)?;
    let listing = ArtifactListing::gather(strongbox.backup.store())
        .await
        .map_err(CliError::Listing)?;
    print_json(&listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/strongbox.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
        assert_eq!(CliError::from(err).kind(), "config");
    }

    #[test]
    fn test_restore_output_shape() {
        let skipped = serde_json::to_value(RestoreOutput::Skipped {
            restore_state: RestoreState::Initialized,
        })
        .unwrap();
        assert_eq!(skipped["outcome"], "skipped");
        assert_eq!(skipped["restore_state"], "initialized");
    }
}
