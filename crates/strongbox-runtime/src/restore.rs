//! Restoring the datastore from the newest artifact.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use strongbox_core::{
    BackupArtifact, CancelSignal, Operation, OperationGuard, OperationLock, RestoreError,
    bounded,
};
use strongbox_store::{ArtifactStore, RestoreTarget, StatementFeed};
use tracing::Instrument;
use uuid::Uuid;

/// Derived on demand from the base-table count; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreState {
    Empty,
    Initialized,
}

impl RestoreState {
    pub fn from_table_count(count: u64) -> Self {
        if count == 0 {
            RestoreState::Empty
        } else {
            RestoreState::Initialized
        }
    }
}

#[derive(Debug)]
pub struct RestoreReport {
    pub run_id: Uuid,
    pub artifact: BackupArtifact,
    pub statements: usize,
    pub elapsed: Duration,
}

pub struct RestoreCoordinator {
    store: ArtifactStore,
    target: Arc<dyn RestoreTarget>,
    lock: OperationLock,
    deadline: Duration,
    cancel: CancelSignal,
}

impl std::fmt::Debug for RestoreCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreCoordinator")
            .field("engine", &self.target.engine())
            .field("local_dir", &self.store.local_dir())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl RestoreCoordinator {
    /// `cancel` aborts downloads and replays in flight, typically on
    /// process shutdown
    pub fn new(
        store: ArtifactStore,
        target: Arc<dyn RestoreTarget>,
        lock: OperationLock,
        deadline: Duration,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            store,
            target,
            lock,
            deadline,
            cancel,
        }
    }

    pub async fn state(&self) -> Result<RestoreState, RestoreError> {
        let count = self.target.count_base_tables().await?;
        Ok(RestoreState::from_table_count(count))
    }

    /// True iff the default schema holds no base tables
    pub async fn is_empty(&self) -> Result<bool, RestoreError> {
        Ok(self.state().await? == RestoreState::Empty)
    }

    /// Fetch remote artifacts, then replay the newest local one
    pub async fn restore_latest(&self) -> Result<RestoreReport, RestoreError> {
        let run_id = Uuid::new_v4();
        let guard = self.acquire()?;
        async {
            if let Err(e) = self.store.download_all(&self.cancel).await {
                tracing::warn!(error = %e, "Download of remote artifacts failed; searching local directory only");
            }

            let artifact = self
                .store
                .latest_local()
                .await
                .map_err(|source| RestoreError::Artifact {
                    path: self.store.local_dir().to_path_buf(),
                    source,
                })?
                .ok_or_else(|| RestoreError::NoBackupFound {
                    dir: self.store.local_dir().to_path_buf(),
                })?;

            self.replay(run_id, artifact, guard).await
        }
        .instrument(tracing::info_span!("restore", %run_id))
        .await
        .inspect_err(log_failure)
    }

    /// Replay one explicit artifact
    pub async fn restore_artifact(&self, path: &Path) -> Result<RestoreReport, RestoreError> {
        let run_id = Uuid::new_v4();
        let guard = self.acquire()?;
        let artifact = BackupArtifact::from_local(path)
            .and_then(|artifact| {
                artifact.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "not a backup artifact (expected backup_<YYYYMMDD_HHMMSS>.sql[.gz])",
                    )
                })
            })
            .map_err(|source| RestoreError::Artifact {
                path: path.to_path_buf(),
                source,
            })?;

        self.replay(run_id, artifact, guard)
            .instrument(tracing::info_span!("restore", %run_id))
            .await
            .inspect_err(log_failure)
    }

    fn acquire(&self) -> Result<OperationGuard, RestoreError> {
        self.lock
            .try_acquire(Operation::Restore)
            .map_err(|busy| RestoreError::Busy {
                operation: busy.holder,
            })
    }

    async fn replay(
        &self,
        run_id: Uuid,
        artifact: BackupArtifact,
        _guard: OperationGuard,
    ) -> Result<RestoreReport, RestoreError> {
        let started = Instant::now();
        tracing::info!(
            artifact = %artifact.name,
            engine = %self.target.engine(),
            size_bytes = artifact.size_bytes,
            "Replaying artifact"
        );

        let feed = StatementFeed::spawn(&artifact.path)?;
        let summary = bounded(self.deadline, &self.cancel, self.target.replay(feed))
            .await
            .map_err(RestoreError::from)??;

        let report = RestoreReport {
            run_id,
            artifact,
            statements: summary.statements,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            artifact = %report.artifact.name,
            statements = report.statements,
            elapsed = %humantime::format_duration(report.elapsed),
            "Restore committed"
        );
        Ok(report)
    }
}

fn log_failure(error: &RestoreError) {
    match error {
        RestoreError::NoBackupFound { .. } | RestoreError::Busy { .. } => {
            tracing::warn!(error = %error, kind = error.kind(), "Restore not performed");
        }
        _ => tracing::error!(error = %error, kind = error.kind(), "Restore failed; nothing was applied"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_count() {
        assert_eq!(RestoreState::from_table_count(0), RestoreState::Empty);
        assert_eq!(RestoreState::from_table_count(7), RestoreState::Initialized);
    }
}
