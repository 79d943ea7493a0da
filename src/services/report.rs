use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::models::report::ProcessedResult;
use crate::services::status_store::{StatusStore, StoreError};
use crate::services::storage::StorageError;

const REPORT_HEADER: [&str; 6] = [
    "Serial Number",
    "Product Name",
    "Input Image Urls",
    "Output Image Urls",
    "Status",
    "Error",
];

/// Where consolidated batch reports live. One report per batch id; writes
/// replace whatever was stored before.
#[async_trait]
pub trait ReportStore: Send + Sync {
    fn location(&self, batch_id: Uuid) -> String;

    async fn write(&self, batch_id: Uuid, contents: &[u8]) -> Result<String, ReportError>;

    async fn read(&self, batch_id: Uuid) -> Result<Option<Vec<u8>>, ReportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to read batch results: {0}")]
    Store(#[from] StoreError),

    #[error("Report storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to render report: {0}")]
    Csv(#[from] csv::Error),

    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes `<output_dir>/<batch_id>_output.csv`.
pub struct FsReportStore {
    output_dir: PathBuf,
}

impl FsReportStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn path(&self, batch_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{}_output.csv", batch_id))
    }
}

#[async_trait]
impl ReportStore for FsReportStore {
    fn location(&self, batch_id: Uuid) -> String {
        self.path(batch_id).to_string_lossy().into_owned()
    }

    async fn write(&self, batch_id: Uuid, contents: &[u8]) -> Result<String, ReportError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.path(batch_id);
        // Write aside and rename so a crash never leaves a truncated report.
        let partial = path.with_extension("csv.partial");
        tokio::fs::write(&partial, contents).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read(&self, batch_id: Uuid) -> Result<Option<Vec<u8>>, ReportError> {
        match tokio::fs::read(self.path(batch_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the consolidated report of a finished batch.
pub struct ReportAggregator {
    store: Arc<dyn StatusStore>,
    reports: Arc<dyn ReportStore>,
}

impl ReportAggregator {
    pub fn new(store: Arc<dyn StatusStore>, reports: Arc<dyn ReportStore>) -> Self {
        Self { store, reports }
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    /// Recompute the report of `batch_id` from persisted state and overwrite
    /// any earlier copy. Returns the report location.
    ///
    /// Callers invoke this once per batch, after the completion check or the
    /// recovery pass reported the batch complete.
    pub async fn aggregate(&self, batch_id: Uuid) -> Result<String, ReportError> {
        let results = self.store.list_completed_jobs(batch_id).await?;
        let succeeded = results
            .iter()
            .filter(|r| r.status == JobStatus::Completed)
            .count();

        let csv = render_csv(&results)?;
        let location = self.reports.write(batch_id, &csv).await?;

        metrics::counter!("batches_completed_total").increment(1);
        tracing::info!(
            batch_id = %batch_id,
            rows = results.len(),
            succeeded = succeeded,
            failed = results.len() - succeeded,
            location = %location,
            "Batch report written"
        );
        Ok(location)
    }
}

/// Render the report table. Locator lists go into a single field each,
/// comma-joined.
pub fn render_csv(results: &[ProcessedResult]) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADER)?;
    for result in results {
        writer.write_record([
            result.serial_number.as_str(),
            result.product_name.as_str(),
            result.input_locators.join(",").as_str(),
            result.output_paths.join(",").as_str(),
            result.status.to_string().as_str(),
            result.error.as_deref().unwrap_or(""),
        ])?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}
