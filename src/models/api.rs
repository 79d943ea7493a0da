use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::batch::{Batch, BatchStatus};
use crate::models::job::JobStatus;
use crate::models::product::ProductRow;

/// JSON body of `POST /api/v1/batches`.
#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub rows: Vec<ProductRow>,
}

/// Response after a batch has been accepted and dispatched.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
    pub job_ids: Vec<Uuid>,
    pub status: BatchStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub expected_jobs: u32,
    pub completed_jobs: u32,
    pub cancelled: bool,
    pub report_location: Option<String>,
}

impl BatchStatusResponse {
    pub fn from_batch(batch: &Batch, report_location: Option<String>) -> Self {
        Self {
            batch_id: batch.id,
            status: batch.status,
            expected_jobs: batch.expected_job_count,
            completed_jobs: batch.completed_job_count,
            cancelled: batch.cancelled,
            report_location,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
