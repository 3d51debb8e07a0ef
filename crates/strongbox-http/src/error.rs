//! Mapping of coordinator errors onto HTTP responses.
//!
//! Every error body has the same shape:
//!
//! ```json
//! { "error": "busy", "message": "Backup already running (restore in progress)" }
//! ```
//!
//! `error` is the machine-readable kind reported by the underlying error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use strongbox_core::{BackupError, RestoreError};

/// Structured error body for the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind
    pub error: String,
    /// Human-readable message
    pub message: String,
}

/// Anything an admin handler can fail with
#[derive(Debug)]
pub enum ApiError {
    Backup(BackupError),
    Restore(RestoreError),
    /// The local artifact directory could not be read
    Listing(std::io::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Backup(e) => e.kind(),
            ApiError::Restore(e) => e.kind(),
            ApiError::Listing(_) => "listing",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Backup(BackupError::Busy { .. })
            | ApiError::Restore(RestoreError::Busy { .. }) => StatusCode::CONFLICT,
            ApiError::Restore(RestoreError::NoBackupFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Backup(e) => e.to_string(),
            ApiError::Restore(e) => e.to_string(),
            ApiError::Listing(e) => format!("Failed to list local artifacts: {e}"),
        }
    }
}

impl From<BackupError> for ApiError {
    fn from(error: BackupError) -> Self {
        ApiError::Backup(error)
    }
}

impl From<RestoreError> for ApiError {
    fn from(error: RestoreError) -> Self {
        ApiError::Restore(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self.message(), "Admin request failed");
        }
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
