//! # Strongbox Runtime
//!
//! Orchestrates the backup and restore pipelines for one datastore:
//!
//! - [`BackupCoordinator`]: lock, dump, upload, retention
//! - [`BackupScheduler`]: fires backups on a cron or interval schedule
//! - [`RestoreCoordinator`]: emptiness probe and transactional replay
//! - [`StartupRestore`]: the once-per-process restore of an empty datastore
//!
//! [`Strongbox`] wires them together from a [`StrongboxConfig`].

pub mod backup;
pub mod restore;
pub mod scheduler;
pub mod startup;

use std::sync::Arc;

use strongbox_core::{
    CancelTrigger, ConfigError, OperationLock, StrongboxConfig, cancel_pair,
};
use strongbox_store::{
    ArtifactStore, DumpRegistry, Rclone, RestoreTarget, SyncTool, restore_target_for,
};

pub use backup::{BackupCoordinator, BackupReport, BackupTicket};
pub use restore::{RestoreCoordinator, RestoreReport, RestoreState};
pub use scheduler::{BackupScheduler, SchedulerHandle};
pub use startup::{StartupOutcome, StartupRestore};

/// Every component for one datastore, sharing one operation lock
#[derive(Debug)]
pub struct Strongbox {
    pub config: Arc<StrongboxConfig>,
    pub backup: Arc<BackupCoordinator>,
    pub restore: Arc<RestoreCoordinator>,
    pub startup: Arc<StartupRestore>,
    lock: OperationLock,
    shutdown: CancelTrigger,
}

impl Strongbox {
    /// Production wiring: registry per dump mode, `rclone`, engine target
    pub fn from_config(config: StrongboxConfig) -> Result<Self, ConfigError> {
        let registry = DumpRegistry::for_datastore(&config.datastore, config.dump_mode);
        let target = restore_target_for(&config.datastore)?;
        let sync: Arc<dyn SyncTool> = Arc::new(Rclone::from_config(&config));
        Ok(Self::assemble(Arc::new(config), registry, sync, target))
    }

    /// Wiring with explicit collaborators
    pub fn assemble(
        config: Arc<StrongboxConfig>,
        registry: DumpRegistry,
        sync: Arc<dyn SyncTool>,
        target: Arc<dyn RestoreTarget>,
    ) -> Self {
        let lock = OperationLock::new();
        let (shutdown, shutdown_signal) = cancel_pair();
        let store = ArtifactStore::from_config(&config, sync);

        let backup = Arc::new(BackupCoordinator::new(
            Arc::clone(&config),
            registry,
            store.clone(),
            lock.clone(),
        ));
        let restore = Arc::new(RestoreCoordinator::new(
            store,
            target,
            lock.clone(),
            config.deadlines.restore,
            shutdown_signal,
        ));
        let startup = Arc::new(StartupRestore::new(
            Arc::clone(&restore),
            config.restore_on_startup,
        ));

        tracing::debug!(
            engine = %config.datastore.engine,
            datastore = %config.datastore,
            local_dir = %config.retention.local_dir.display(),
            remote = %config.retention.remote_target(),
            "Strongbox assembled"
        );

        Self {
            config,
            backup,
            restore,
            startup,
            lock,
            shutdown,
        }
    }

    /// Scheduler for the configured expression; call `spawn` to start it
    pub fn scheduler(&self) -> BackupScheduler {
        BackupScheduler::new(
            self.config.retention.schedule.clone(),
            Arc::clone(&self.backup),
        )
    }

    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    /// Cancel in-flight backups, downloads and replays
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if self.backup.cancel_running() {
            tracing::info!("Cancelled running backup");
        }
    }
}
