//! Local artifact directory plus its remote replica.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use strongbox_core::artifact::{INCLUDE_PATTERNS, sort_oldest_first};
use strongbox_core::{
    ArtifactFormat, ArtifactName, BackupArtifact, CancelSignal, RetentionError, RetentionPolicy,
    RetentionReport, RetentionScope, StrongboxConfig, ToolError, UploadError,
};

use crate::sync::{RemoteTarget, SyncTool};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    local_dir: PathBuf,
    remote: RemoteTarget,
    sync: Arc<dyn SyncTool>,
}

impl ArtifactStore {
    pub fn new(local_dir: impl Into<PathBuf>, remote: RemoteTarget, sync: Arc<dyn SyncTool>) -> Self {
        Self {
            local_dir: local_dir.into(),
            remote,
            sync,
        }
    }

    pub fn from_config(config: &StrongboxConfig, sync: Arc<dyn SyncTool>) -> Self {
        let retention = &config.retention;
        Self::new(
            retention.local_dir.clone(),
            RemoteTarget::new(&retention.remote_name, &retention.remote_folder),
            sync,
        )
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn remote(&self) -> &RemoteTarget {
        &self.remote
    }

    /// A fresh artifact path in the local directory.
    ///
    /// Names have second resolution; if the current second is taken by a
    /// finished or in-progress artifact, waits for the next one.
    pub async fn allocate(&self, format: ArtifactFormat) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.local_dir).await?;
        loop {
            let now = Local::now();
            let name = ArtifactName::new(now.naive_local(), format);
            let path = self.local_dir.join(name.file_name());
            let partial = self.local_dir.join(name.partial_file_name());
            if !tokio::fs::try_exists(&path).await? && !tokio::fs::try_exists(&partial).await? {
                return Ok(path);
            }
            let remaining = 1_000 - u64::from(now.timestamp_subsec_millis().min(999));
            tokio::time::sleep(Duration::from_millis(remaining)).await;
        }
    }

    /// Replicate one artifact to the remote folder
    pub async fn upload(&self, artifact: &Path, cancel: &CancelSignal) -> Result<(), UploadError> {
        self.sync
            .copy_to(artifact, &self.remote, cancel)
            .await
            .map_err(|source| UploadError {
                artifact: artifact.display().to_string(),
                remote: self.remote.to_string(),
                source,
            })?;
        tracing::info!(artifact = %artifact.display(), remote = %self.remote, "Artifact uploaded");
        Ok(())
    }

    /// Local artifacts, oldest first. A missing directory holds none.
    pub async fn list_local(&self) -> io::Result<Vec<BackupArtifact>> {
        let dir = self.local_dir.clone();
        tokio::task::spawn_blocking(move || list_dir(&dir))
            .await
            .map_err(io::Error::other)?
    }

    /// Remote artifacts, oldest first
    pub async fn list_remote(&self, cancel: &CancelSignal) -> Result<Vec<BackupArtifact>, ToolError> {
        let entries = self.sync.list(&self.remote, cancel).await?;
        let mut artifacts: Vec<BackupArtifact> = entries
            .iter()
            .filter_map(|entry| {
                BackupArtifact::from_remote(&entry.path, entry.mod_time, entry.size_bytes())
            })
            .collect();
        sort_oldest_first(&mut artifacts);
        Ok(artifacts)
    }

    /// Copy every remote artifact into the local directory
    pub async fn download_all(&self, cancel: &CancelSignal) -> Result<(), ToolError> {
        tokio::fs::create_dir_all(&self.local_dir)
            .await
            .map_err(|source| ToolError::Io {
                program: "mkdir".to_string(),
                source,
            })?;
        self.sync
            .copy_from(&self.remote, &self.local_dir, &INCLUDE_PATTERNS, cancel)
            .await
    }

    /// Newest local artifact; equal modification times go to the greater name
    pub async fn latest_local(&self) -> io::Result<Option<BackupArtifact>> {
        Ok(self.list_local().await?.pop())
    }

    pub async fn sweep_local(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> RetentionReport {
        let mut report = RetentionReport::new(RetentionScope::Local);
        let artifacts = match self.list_local().await {
            Ok(artifacts) => artifacts,
            Err(source) => {
                report.failures.push(RetentionError::LocalListing {
                    dir: self.local_dir.clone(),
                    source,
                });
                return report;
            }
        };
        report.examined = artifacts.len();

        for artifact in policy.select_expired(&artifacts, now) {
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => {
                    tracing::info!(artifact = %artifact.name, "Deleted expired local artifact");
                    report.deleted.push(artifact.name.clone());
                }
                // Already gone counts as swept
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    report.deleted.push(artifact.name.clone());
                }
                Err(source) => {
                    let error = RetentionError::Local {
                        path: artifact.path.clone(),
                        source,
                    };
                    tracing::warn!(error = %error, "Retention failed for local artifact");
                    report.failures.push(error);
                }
            }
        }
        report
    }

    pub async fn sweep_remote(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> RetentionReport {
        let mut report = RetentionReport::new(RetentionScope::Remote);
        let artifacts = match self.list_remote(cancel).await {
            Ok(artifacts) => artifacts,
            Err(source) => {
                report.failures.push(RetentionError::RemoteListing(source));
                return report;
            }
        };
        report.examined = artifacts.len();

        for artifact in policy.select_expired(&artifacts, now) {
            let path = artifact.path.to_string_lossy();
            match self.sync.delete_file(&self.remote, &path, cancel).await {
                Ok(()) => {
                    tracing::info!(artifact = %artifact.name, remote = %self.remote, "Deleted expired remote artifact");
                    report.deleted.push(artifact.name.clone());
                }
                Err(source) => {
                    let error = RetentionError::Remote {
                        name: artifact.name.clone(),
                        source,
                    };
                    tracing::warn!(error = %error, "Retention failed for remote artifact");
                    report.failures.push(error);
                }
            }
        }
        report
    }
}

fn list_dir(dir: &Path) -> io::Result<Vec<BackupArtifact>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        match BackupArtifact::from_local(&path) {
            Ok(Some(artifact)) => artifacts.push(artifact),
            Ok(None) => {}
            // Removed between listing and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    sort_oldest_first(&mut artifacts);
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RemoteEntry;
    use async_trait::async_trait;
    use std::fs::{File, FileTimes};
    use std::sync::Mutex;
    use std::time::SystemTime;

    /// Records calls; lists a fixed set of entries
    #[derive(Debug, Default)]
    struct RecordingSync {
        entries: Vec<RemoteEntry>,
        fail_deletes: bool,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSync {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncTool for RecordingSync {
        async fn copy_to(
            &self,
            file: &Path,
            remote: &RemoteTarget,
            _cancel: &CancelSignal,
        ) -> Result<(), ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("copy {} {remote}", file.display()));
            Ok(())
        }

        async fn copy_from(
            &self,
            remote: &RemoteTarget,
            local_dir: &Path,
            include: &[&str],
            _cancel: &CancelSignal,
        ) -> Result<(), ToolError> {
            self.calls.lock().unwrap().push(format!(
                "copy {remote} {} {}",
                local_dir.display(),
                include.join(",")
            ));
            Ok(())
        }

        async fn list(
            &self,
            _remote: &RemoteTarget,
            _cancel: &CancelSignal,
        ) -> Result<Vec<RemoteEntry>, ToolError> {
            Ok(self.entries.clone())
        }

        async fn delete_file(
            &self,
            _remote: &RemoteTarget,
            path: &str,
            _cancel: &CancelSignal,
        ) -> Result<(), ToolError> {
            self.calls.lock().unwrap().push(format!("deletefile {path}"));
            if self.fail_deletes {
                return Err(ToolError::Failed {
                    program: "rclone".to_string(),
                    code: Some(3),
                    stderr: "directory not found".to_string(),
                });
            }
            Ok(())
        }
    }

    fn store(dir: &Path, sync: Arc<RecordingSync>) -> ArtifactStore {
        ArtifactStore::new(dir, RemoteTarget::new("offsite", "backups"), sync)
    }

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_times(FileTimes::new().set_modified(modified)).unwrap();
        path
    }

    fn days_ago(days: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(days * 86_400)
    }

    fn remote_entry(name: &str, days: i64) -> RemoteEntry {
        RemoteEntry {
            path: name.to_string(),
            name: name.to_string(),
            size: 10,
            mod_time: Utc::now() - chrono::Duration::days(days),
            is_dir: false,
        }
    }

    #[tokio::test]
    async fn test_list_local_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "backup_20240102_000000.sql", days_ago(1));
        touch(dir.path(), "backup_20240101_000000.sql.gz", days_ago(2));
        touch(dir.path(), "backup_20240103_000000.sql.partial", days_ago(0));
        touch(dir.path(), "notes.txt", days_ago(0));

        let store = store(dir.path(), Arc::default());
        let names: Vec<String> = store
            .list_local()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(
            names,
            ["backup_20240101_000000.sql.gz", "backup_20240102_000000.sql"]
        );
    }

    #[tokio::test]
    async fn test_missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("absent"), Arc::default());
        assert!(store.list_local().await.unwrap().is_empty());
        assert!(store.latest_local().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_breaks_ties_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let same = days_ago(1);
        touch(dir.path(), "backup_20240101_000000.sql", same);
        touch(dir.path(), "backup_20240101_000001.sql", same);

        let latest = store(dir.path(), Arc::default())
            .latest_local()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.name, "backup_20240101_000001.sql");
    }

    #[tokio::test]
    async fn test_allocate_skips_taken_second() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("nested"), Arc::default());

        let first = store.allocate(ArtifactFormat::Sql).await.unwrap();
        assert!(dir.path().join("nested").is_dir());
        File::create(&first).unwrap();

        let second = store.allocate(ArtifactFormat::Sql).await.unwrap();
        assert_ne!(first, second);
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn test_sweep_local_deletes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "backup_20240101_000000.sql", days_ago(40));
        let recent = touch(dir.path(), "backup_20240131_000000.sql", days_ago(10));

        let store = store(dir.path(), Arc::default());
        let policy = RetentionPolicy::from_days(30).unwrap();
        let report = store.sweep_local(&policy, Utc::now()).await;

        assert_eq!(report.examined, 2);
        assert_eq!(report.deleted, ["backup_20240101_000000.sql"]);
        assert!(report.is_clean());
        assert!(!old.exists());
        assert!(recent.exists());

        let again = store.sweep_local(&policy, Utc::now()).await;
        assert!(again.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_remote_collects_failures() {
        let sync = Arc::new(RecordingSync {
            entries: vec![
                remote_entry("backup_20240101_000000.sql", 40),
                remote_entry("backup_20240131_000000.sql", 10),
                remote_entry("unrelated.bin", 400),
            ],
            fail_deletes: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Arc::clone(&sync));

        let policy = RetentionPolicy::from_days(30).unwrap();
        let report = store
            .sweep_remote(&policy, Utc::now(), &CancelSignal::never())
            .await;

        assert_eq!(report.examined, 2);
        assert!(report.deleted.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(sync.calls(), ["deletefile backup_20240101_000000.sql"]);
    }

    #[tokio::test]
    async fn test_upload_and_download_address_remote() {
        let sync = Arc::new(RecordingSync::default());
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Arc::clone(&sync));

        let artifact = dir.path().join("backup_20240101_000000.sql");
        store
            .upload(&artifact, &CancelSignal::never())
            .await
            .unwrap();
        store.download_all(&CancelSignal::never()).await.unwrap();

        let calls = sync.calls();
        assert_eq!(
            calls[0],
            format!("copy {} offsite:backups", artifact.display())
        );
        assert_eq!(
            calls[1],
            format!(
                "copy offsite:backups {} backup_*.sql,backup_*.sql.gz",
                dir.path().display()
            )
        );
    }
}
