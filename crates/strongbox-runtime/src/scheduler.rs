//! Fires backups on a schedule expression.

use std::sync::Arc;

use chrono::Local;
use strongbox_core::{BackupError, CancelSignal, CancelTrigger, Schedule, cancel_pair};
use tokio::task::JoinHandle;

use crate::backup::BackupCoordinator;

#[derive(Debug)]
pub struct BackupScheduler {
    schedule: Schedule,
    coordinator: Arc<BackupCoordinator>,
}

/// Controls a running scheduler task
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: CancelTrigger,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop firing; a run already in progress is allowed to finish
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            tracing::error!("Backup scheduler task panicked");
        }
    }

    /// Stop immediately, dropping any run in progress
    pub fn abort(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl BackupScheduler {
    pub fn new(schedule: Schedule, coordinator: Arc<BackupCoordinator>) -> Self {
        Self {
            schedule,
            coordinator,
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (stop, stopped) = cancel_pair();
        let task = tokio::spawn(self.run(stopped));
        SchedulerHandle { stop, task }
    }

    async fn run(self, stopped: CancelSignal) {
        tracing::info!(schedule = %self.schedule, "Backup scheduler started");
        loop {
            // Next fire time is computed after the previous run returned
            let Some(delay) = self.schedule.delay_from(Local::now()) else {
                tracing::warn!(schedule = %self.schedule, "Schedule has no future firing; scheduler stopping");
                return;
            };
            tracing::debug!(next_in = %humantime::format_duration(delay), "Next scheduled backup");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped.cancelled() => break,
            }

            // Failures are logged by the run; the next firing goes ahead
            if let Err(BackupError::Busy { operation }) = self.coordinator.backup_now().await {
                tracing::warn!(%operation, "Scheduled backup skipped; another operation holds the datastore");
            }
        }
        tracing::info!("Backup scheduler stopped");
    }
}
