//! Liveness endpoint.

use axum::{extract::State, response::Json};
use serde::Serialize;
use strongbox_core::{Engine, Operation};
use strongbox_runtime::RestoreState;

use crate::AdminApi;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub engine: Engine,
    /// `None` when the datastore could not be probed
    pub restore_state: Option<RestoreState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_state_error: Option<String>,
    /// Backup or restore currently holding the datastore
    pub running: Option<Operation>,
}

/// GET /health - always 200 while the process serves requests
pub async fn health_check(State(api): State<AdminApi>) -> Json<HealthResponse> {
    let (restore_state, restore_state_error) = match api.strongbox.restore.state().await {
        Ok(state) => (Some(state), None),
        Err(e) => {
            tracing::warn!(error = %e, "Datastore probe failed during health check");
            (None, Some(e.to_string()))
        }
    };

    Json(HealthResponse {
        status: "ok",
        service: "strongbox",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        uptime_seconds: api.started.elapsed().as_secs(),
        engine: api.strongbox.config.datastore.engine,
        restore_state,
        restore_state_error,
        running: api.strongbox.lock().holder(),
    })
}
