//! # Strongbox HTTP
//!
//! Admin surface for a running Strongbox:
//!
//! | Route | Success |
//! |---|---|
//! | `POST /admin/backup/run` | 200, the finished run |
//! | `POST /admin/backup/run-async` | 202, `{ "run_id": … }` |
//! | `POST /admin/restore/run` | 200, `{ "artifact": …, "statements": … }` |
//! | `GET /admin/backup/artifacts` | 200, local and remote listings |
//! | `GET /health` | 200, liveness and restore state |
//!
//! Failures answer 409 when another operation holds the datastore, 404 when
//! no backup exists and 500 otherwise, with an [`ErrorResponse`] body.
//!
//! The surface carries no authentication; bind it to a private interface.

pub mod error;
pub mod handlers;
mod shutdown;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post},
};
use strongbox_runtime::Strongbox;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ErrorResponse};
pub use shutdown::shutdown_signal;

use handlers::{health_check, list_artifacts, run_backup, run_backup_async, run_restore};

/// Shared state of the admin router
#[derive(Debug, Clone)]
pub struct AdminApi {
    pub strongbox: Arc<Strongbox>,
    pub started: Instant,
}

impl AdminApi {
    pub fn new(strongbox: Arc<Strongbox>) -> Self {
        Self {
            strongbox,
            started: Instant::now(),
        }
    }

    pub fn router(self) -> Router {
        let admin = Router::new()
            .route("/backup/run", post(run_backup))
            .route("/backup/run-async", post(run_backup_async))
            .route("/backup/artifacts", get(list_artifacts))
            .route("/restore/run", post(run_restore));

        Router::new()
            .route("/health", get(health_check))
            .nest("/admin", admin)
            .with_state(self)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }
}
