use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    BatchStatusResponse, JobStatusResponse, SubmitBatchRequest, SubmitBatchResponse,
};
use crate::models::batch::BatchStatus;
use crate::models::product::ProductRow;
use crate::routes::ApiError;
use crate::services::ingest;
use crate::services::status_store::StoreError;

/// POST /upload: Submit a batch as a CSV spreadsheet in the `file` field.
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitBatchResponse>, ApiError> {
    let mut csv: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            csv = Some(data.to_vec());
        }
    }

    let csv = csv.ok_or_else(|| ApiError::BadRequest("No file part".to_string()))?;
    let rows = ingest::parse_product_csv(&csv)?;
    submit(&state, rows).await
}

/// POST /api/v1/batches: Submit a batch as JSON rows.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<Json<SubmitBatchResponse>, ApiError> {
    submit(&state, request.rows).await
}

async fn submit(state: &AppState, rows: Vec<ProductRow>) -> Result<Json<SubmitBatchResponse>, ApiError> {
    let submission = state.coordinator.submit_batch(rows).await?;
    Ok(Json(SubmitBatchResponse {
        batch_id: submission.batch_id,
        job_ids: submission.job_ids,
        status: BatchStatus::Processing,
    }))
}

/// GET /status/{job_id}: Current status of one job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    match state.coordinator.job_status(job_id).await {
        Ok(status) => Ok(Json(JobStatusResponse { job_id, status })),
        Err(StoreError::NotFound { .. }) => Err(ApiError::NotFound("Request ID not found".to_string())),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/v1/batches/{batch_id}: Batch progress.
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let batch = state.store.get_batch(batch_id).await?;
    let report_location = match batch.status {
        BatchStatus::Completed => Some(state.reports.location(batch_id)),
        BatchStatus::Processing => None,
    };
    Ok(Json(BatchStatusResponse::from_batch(&batch, report_location)))
}

/// POST /api/v1/batches/{batch_id}/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    state.coordinator.cancel_batch(batch_id).await?;
    let batch = state.store.get_batch(batch_id).await?;
    Ok(Json(BatchStatusResponse::from_batch(&batch, None)))
}

/// POST /api/v1/batches/{batch_id}/reconcile: Recount a batch from its
/// terminal jobs.
pub async fn reconcile_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let batch = state.coordinator.reconcile_batch(batch_id).await?;
    let report_location = match batch.status {
        BatchStatus::Completed => Some(state.reports.location(batch_id)),
        BatchStatus::Processing => None,
    };
    Ok(Json(BatchStatusResponse::from_batch(&batch, report_location)))
}

/// GET /api/v1/batches/{batch_id}/report: The consolidated CSV report.
pub async fn get_batch_report(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown batches are 404 before touching report storage.
    state.store.get_batch(batch_id).await?;
    let report = state
        .reports
        .read(batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Report for batch {} not ready", batch_id)))?;

    Ok(([(header::CONTENT_TYPE, "text/csv")], report))
}
