//! Automatic restore at process start.
//!
//! Runs at most once per process and only when the datastore holds no base
//! tables. It never returns an error: every failure is logged and reported
//! as a [`StartupOutcome`], so the host always goes on to start serving.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use strongbox_core::RestoreError;

use crate::restore::RestoreCoordinator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartupOutcome {
    /// Turned off by configuration
    Disabled,
    /// An earlier call already ran the hook
    AlreadyRan,
    /// The datastore has tables; nothing to do
    AlreadyInitialized,
    Restored { artifact: String, statements: usize },
    NoBackupFound,
    Failed { kind: String, message: String },
}

#[derive(Debug)]
pub struct StartupRestore {
    coordinator: Arc<RestoreCoordinator>,
    enabled: bool,
    ran: AtomicBool,
}

impl StartupRestore {
    pub fn new(coordinator: Arc<RestoreCoordinator>, enabled: bool) -> Self {
        Self {
            coordinator,
            enabled,
            ran: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) -> StartupOutcome {
        if self.ran.swap(true, Ordering::SeqCst) {
            return StartupOutcome::AlreadyRan;
        }
        if !self.enabled {
            tracing::info!("Startup restore disabled");
            return StartupOutcome::Disabled;
        }

        // A panic in the restore path must not take the host down with it
        let coordinator = Arc::clone(&self.coordinator);
        match tokio::spawn(async move { check_and_restore(&coordinator).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Startup restore task failed");
                StartupOutcome::Failed {
                    kind: "worker".to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}

async fn check_and_restore(coordinator: &RestoreCoordinator) -> StartupOutcome {
    match coordinator.is_empty().await {
        Ok(false) => {
            tracing::info!("Datastore already initialized; skipping startup restore");
            StartupOutcome::AlreadyInitialized
        }
        Ok(true) => {
            tracing::info!("Datastore is empty; restoring latest backup");
            match coordinator.restore_latest().await {
                Ok(report) => StartupOutcome::Restored {
                    artifact: report.artifact.name,
                    statements: report.statements,
                },
                Err(RestoreError::NoBackupFound { .. }) => StartupOutcome::NoBackupFound,
                Err(e) => failed(&e),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not determine whether the datastore is empty");
            failed(&e)
        }
    }
}

fn failed(error: &RestoreError) -> StartupOutcome {
    StartupOutcome::Failed {
        kind: error.kind().to_string(),
        message: error.to_string(),
    }
}
