use axum::{extract::State, response::Json};
use serde::Serialize;
use strongbox_runtime::RestoreReport;
use uuid::Uuid;

use crate::AdminApi;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct RestoreRunResponse {
    pub run_id: Uuid,
    pub artifact: String,
    pub statements: usize,
    pub elapsed_ms: u128,
}

impl From<RestoreReport> for RestoreRunResponse {
    fn from(report: RestoreReport) -> Self {
        Self {
            run_id: report.run_id,
            artifact: report.artifact.name,
            statements: report.statements,
            elapsed_ms: report.elapsed.as_millis(),
        }
    }
}

/// POST /admin/restore/run - replay the newest artifact
pub async fn run_restore(
    State(api): State<AdminApi>,
) -> Result<Json<RestoreRunResponse>, ApiError> {
    let report = api.strongbox.restore.restore_latest().await?;
    Ok(Json(report.into()))
}
