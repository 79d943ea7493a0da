pub mod batches;
pub mod health;
pub mod metrics;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::models::api::ErrorResponse;
use crate::services::coordinator::BatchError;
use crate::services::ingest::IngestError;
use crate::services::report::ReportError;
use crate::services::status_store::StoreError;

/// Batch submission, status and report routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(batches::upload_csv))
        .route("/status/{job_id}", get(batches::get_job_status))
        .route("/api/v1/batches", post(batches::submit_batch))
        .route("/api/v1/batches/{batch_id}", get(batches::get_batch_status))
        .route("/api/v1/batches/{batch_id}/cancel", post(batches::cancel_batch))
        .route("/api/v1/batches/{batch_id}/reconcile", post(batches::reconcile_batch))
        .route("/api/v1/batches/{batch_id}/report", get(batches::get_batch_report))
        .route("/api/v1/jobs/{job_id}", get(batches::get_job_status))
        .with_state(state)
}

/// Error returned by route handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal(m) => {
                tracing::error!(error = %m, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound(e.to_string()),
            StoreError::DuplicateSerial(_) => Self::Conflict(e.to_string()),
            StoreError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            StoreError::Persistence(_) | StoreError::Database(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::EmptyBatch | BatchError::InvalidRow { .. } => Self::BadRequest(e.to_string()),
            BatchError::DuplicateSerial(_) => Self::Conflict(e.to_string()),
            BatchError::Store(inner) => inner.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Store(inner) => inner.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}
