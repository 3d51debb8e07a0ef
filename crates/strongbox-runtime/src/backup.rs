//! The backup pipeline: lock, dump, upload, retention.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use strongbox_core::{
    BackupArtifact, BackupError, CancelTrigger, DumpError, Operation, OperationGuard,
    OperationLock, RetentionReport, StrongboxConfig, bounded, cancel_pair,
};
use strongbox_store::{ArtifactStore, DumpRegistry, DumpStats};
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of one successful dump. Upload and retention results are
/// informational; neither makes the run fail.
#[derive(Debug)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub artifact: BackupArtifact,
    pub stats: DumpStats,
    pub uploaded: bool,
    /// Empty when the upload failed and retention was skipped
    pub retention: Vec<RetentionReport>,
    pub elapsed: Duration,
}

/// Handle returned by [`BackupCoordinator::spawn_backup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackupTicket {
    pub run_id: Uuid,
}

pub struct BackupCoordinator {
    config: Arc<StrongboxConfig>,
    registry: DumpRegistry,
    store: ArtifactStore,
    lock: OperationLock,
    running: Mutex<Option<CancelTrigger>>,
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("engine", &self.config.datastore.engine)
            .field("registry", &self.registry)
            .field("local_dir", &self.store.local_dir())
            .finish()
    }
}

/// Clears the cancel slot when a run ends, however it ends
struct RunSlot<'a>(&'a Mutex<Option<CancelTrigger>>);

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl BackupCoordinator {
    pub fn new(
        config: Arc<StrongboxConfig>,
        registry: DumpRegistry,
        store: ArtifactStore,
        lock: OperationLock,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            lock,
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run the whole pipeline and wait for it
    pub async fn backup_now(&self) -> Result<BackupReport, BackupError> {
        let run_id = Uuid::new_v4();
        let guard = self.acquire()?;
        self.run(run_id, guard)
            .instrument(tracing::info_span!("backup", %run_id))
            .await
    }

    /// Start the pipeline on a background task. The lock is taken before
    /// returning, so a busy datastore is reported to the caller.
    pub fn spawn_backup(self: &Arc<Self>) -> Result<BackupTicket, BackupError> {
        let run_id = Uuid::new_v4();
        let guard = self.acquire()?;
        let coordinator = Arc::clone(self);
        tokio::spawn(
            async move {
                // Outcome is logged by the run itself
                let _ = coordinator.run(run_id, guard).await;
            }
            .instrument(tracing::info_span!("backup", %run_id)),
        );
        Ok(BackupTicket { run_id })
    }

    /// Cancel the run in progress, if any
    pub fn cancel_running(&self) -> bool {
        match self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(trigger) => {
                trigger.cancel();
                true
            }
            None => false,
        }
    }

    fn acquire(&self) -> Result<OperationGuard, BackupError> {
        self.lock
            .try_acquire(Operation::Backup)
            .map_err(|busy| BackupError::Busy {
                operation: busy.holder,
            })
    }

    async fn run(&self, run_id: Uuid, _guard: OperationGuard) -> Result<BackupReport, BackupError> {
        let result = self.execute(run_id).await;
        match &result {
            Ok(report) => tracing::info!(
                artifact = %report.artifact.name,
                size_bytes = report.artifact.size_bytes,
                tables = report.stats.tables,
                rows = report.stats.rows,
                uploaded = report.uploaded,
                elapsed = %humantime::format_duration(report.elapsed),
                "Backup completed"
            ),
            Err(e) => tracing::error!(error = %e, kind = e.kind(), "Backup failed"),
        }
        result
    }

    async fn execute(&self, run_id: Uuid) -> Result<BackupReport, BackupError> {
        let started = Instant::now();
        let engine = self.config.datastore.engine;
        let strategy = self.registry.get(engine)?;

        let (trigger, cancel) = cancel_pair();
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(trigger);
        let _slot = RunSlot(&self.running);

        let path = self
            .store
            .allocate(strategy.format())
            .await
            .map_err(DumpError::Io)?;
        tracing::info!(
            engine = %engine,
            mode = %strategy.mode(),
            artifact = %path.display(),
            "Starting dump"
        );

        let stats = bounded(self.config.deadlines.dump, &cancel, strategy.dump(&path, &cancel))
            .await
            .map_err(DumpError::from)??;

        let artifact = BackupArtifact::from_local(&path)
            .map_err(DumpError::Io)?
            .ok_or_else(|| {
                DumpError::Worker(format!("artifact {} missing after dump", path.display()))
            })?
            .with_engine(engine);

        let uploaded = match self.store.upload(&artifact.path, &cancel).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed; retention skipped for this run");
                false
            }
        };

        let mut retention = Vec::new();
        if uploaded {
            let policy = &self.config.retention.retention;
            let now = Utc::now();
            retention.push(self.store.sweep_local(policy, now).await);
            retention.push(self.store.sweep_remote(policy, now, &cancel).await);
            for report in &retention {
                for failure in &report.failures {
                    tracing::warn!(scope = ?report.scope, error = %failure, "Retention failure");
                }
                tracing::debug!(
                    scope = ?report.scope,
                    examined = report.examined,
                    deleted = report.deleted.len(),
                    "Retention sweep finished"
                );
            }
        }

        Ok(BackupReport {
            run_id,
            artifact,
            stats,
            uploaded,
            retention,
            elapsed: started.elapsed(),
        })
    }
}
