//! Backup endpoints and the artifact listing.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use strongbox_core::{BackupArtifact, CancelSignal, RetentionScope};
use strongbox_runtime::{BackupReport, BackupTicket};
use strongbox_store::ArtifactStore;
use uuid::Uuid;

use crate::AdminApi;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct RetentionSummary {
    pub scope: RetentionScope,
    pub examined: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<String>,
}

/// Body of a completed synchronous backup
#[derive(Debug, Serialize)]
pub struct BackupRunResponse {
    pub run_id: Uuid,
    pub path: String,
    pub artifact: String,
    pub size_bytes: u64,
    pub tables: usize,
    pub rows: u64,
    pub uploaded: bool,
    pub retention: Vec<RetentionSummary>,
    pub elapsed_ms: u128,
}

impl From<BackupReport> for BackupRunResponse {
    fn from(report: BackupReport) -> Self {
        Self {
            run_id: report.run_id,
            path: report.artifact.path.display().to_string(),
            artifact: report.artifact.name,
            size_bytes: report.artifact.size_bytes,
            tables: report.stats.tables,
            rows: report.stats.rows,
            uploaded: report.uploaded,
            retention: report
                .retention
                .into_iter()
                .map(|r| RetentionSummary {
                    scope: r.scope,
                    examined: r.examined,
                    deleted: r.deleted,
                    failures: r.failures.iter().map(ToString::to_string).collect(),
                })
                .collect(),
            elapsed_ms: report.elapsed.as_millis(),
        }
    }
}

/// Local listing, plus the remote one when the remote answered
#[derive(Debug, Serialize)]
pub struct ArtifactListing {
    pub local: Vec<BackupArtifact>,
    pub remote: Option<Vec<BackupArtifact>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

impl ArtifactListing {
    /// Only a local failure is an error; the remote is best-effort
    pub async fn gather(store: &ArtifactStore) -> std::io::Result<Self> {
        let local = store.list_local().await?;

        // The sync tool's own deadline bounds the call
        let (remote, remote_error) = match store.list_remote(&CancelSignal::never()).await {
            Ok(remote) => (Some(remote), None),
            Err(e) => {
                tracing::warn!(error = %e, "Remote listing failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(Self {
            local,
            remote,
            remote_error,
        })
    }
}

/// POST /admin/backup/run - run a backup and wait for it
pub async fn run_backup(
    State(api): State<AdminApi>,
) -> Result<Json<BackupRunResponse>, ApiError> {
    let report = api.strongbox.backup.backup_now().await?;
    Ok(Json(report.into()))
}

/// POST /admin/backup/run-async - start a backup in the background
pub async fn run_backup_async(
    State(api): State<AdminApi>,
) -> Result<(StatusCode, Json<BackupTicket>), ApiError> {
    let ticket = api.strongbox.backup.spawn_backup()?;
    tracing::info!(run_id = %ticket.run_id, "Background backup accepted");
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// GET /admin/backup/artifacts - local artifacts and, best-effort, remote ones
pub async fn list_artifacts(
    State(api): State<AdminApi>,
) -> Result<Json<ArtifactListing>, ApiError> {
    let listing = ArtifactListing::gather(api.strongbox.backup.store())
        .await
        .map_err(ApiError::Listing)?;
    Ok(Json(listing))
}
