use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::analysis::ReportError;
use crate::scheduler::CycleError;

/// Error half of every handler; rendered inside the usual `{"error", "meta"}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Storage(e) => ApiError::Internal(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<CycleError> for ApiError {
    fn from(err: CycleError) -> Self {
        ApiError::Conflict(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "error": { "status": status.as_u16(), "message": message },
            "meta": { "timestamp": chrono::Utc::now().to_rfc3339() }
        });
        (status, Json(body)).into_response()
    }
}
