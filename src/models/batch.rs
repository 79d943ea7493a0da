use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
}

/// One submission of product rows and its aggregate progress.
///
/// `completed_job_count` counts jobs that reached a terminal state, successful
/// or not. It only moves through the store's atomic increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub expected_job_count: u32,
    pub completed_job_count: u32,
    pub status: BatchStatus,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one `increment_completed_and_check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTick {
    pub completed: u32,
    pub batch_complete: bool,
}
