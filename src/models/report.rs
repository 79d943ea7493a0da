use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;

/// One report row, read back from persisted job and product records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedResult {
    pub serial_number: String,
    pub product_name: String,
    pub input_locators: Vec<String>,
    pub output_paths: Vec<String>,
    pub status: JobStatus,
    pub error: Option<String>,
}
