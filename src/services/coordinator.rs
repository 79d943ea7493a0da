use std::collections::HashSet;
use std::sync::Arc;

use garde::Validate;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::models::batch::{Batch, BatchStatus};
use crate::models::job::{Job, JobStatus};
use crate::models::product::{Product, ProductRow};
use crate::services::report::ReportAggregator;
use crate::services::status_store::{StatusStore, StoreError};
use crate::services::worker::JobWorker;

/// Result of accepting a batch.
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub batch_id: Uuid,
    pub job_ids: Vec<Uuid>,
}

/// What a recovery pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    pub interrupted_jobs: usize,
    pub reports_written: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch contains no rows")]
    EmptyBatch,

    #[error("Serial number already exists: {0}")]
    DuplicateSerial(String),

    #[error("Invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateSerial(serial) => Self::DuplicateSerial(serial),
            other => Self::Store(other),
        }
    }
}

/// Turns validated rows into a running batch on a bounded worker pool.
pub struct BatchCoordinator {
    store: Arc<dyn StatusStore>,
    worker: Arc<JobWorker>,
    aggregator: Arc<ReportAggregator>,
    permits: Arc<Semaphore>,
}

impl BatchCoordinator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        worker: Arc<JobWorker>,
        aggregator: Arc<ReportAggregator>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            store,
            worker,
            aggregator,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Arc<ReportAggregator> {
        &self.aggregator
    }

    /// Persist a batch and its jobs, then dispatch one worker per job.
    ///
    /// Returns as soon as the workers are scheduled. Rejected batches leave
    /// nothing in the store and schedule nothing.
    pub async fn submit_batch(&self, rows: Vec<ProductRow>) -> Result<BatchSubmission, BatchError> {
        if rows.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        {
            let mut seen = HashSet::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                row.validate().map_err(|e| BatchError::InvalidRow {
                    row: index + 1,
                    reason: e.to_string(),
                })?;
                if !seen.insert(row.serial_number.as_str()) {
                    return Err(BatchError::DuplicateSerial(row.serial_number.clone()));
                }
            }
        }

        let products: Vec<Product> = rows.into_iter().map(Product::from).collect();
        let (batch, jobs) = self.store.create_batch_with_jobs(products.clone()).await?;

        metrics::counter!("batches_submitted_total").increment(1);
        tracing::info!(batch_id = %batch.id, jobs = jobs.len(), "Batch accepted");

        let job_ids = jobs.iter().map(|job| job.id).collect();
        for (job, product) in jobs.into_iter().zip(products) {
            self.dispatch(job, product);
        }

        Ok(BatchSubmission {
            batch_id: batch.id,
            job_ids,
        })
    }

    /// Schedule a worker for `job`. It waits for a pool permit before touching
    /// any image.
    fn dispatch(&self, job: Job, product: Product) {
        let worker = self.worker.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!(job_id = %job.id, "Worker pool closed, job not started");
                    return;
                }
            };
            worker.run(job, product).await;
        });
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        self.store.get_job_status(job_id).await
    }

    /// Flag a batch as cancelled. Running jobs stop after their current image
    /// and report `Failed`; the batch still completes and gets a report.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<(), StoreError> {
        self.store.cancel_batch(batch_id).await?;
        tracing::info!(batch_id = %batch_id, "Batch cancelled");
        Ok(())
    }

    /// Recount a live batch from its terminal jobs, for completions whose
    /// increment was lost. Unfinished jobs are left alone. Writes the report
    /// when this call is the one that completes the batch.
    pub async fn reconcile_batch(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        let tick = self.store.reconcile_batch(batch_id).await?;
        tracing::info!(batch_id = %batch_id, completed = tick.completed, "Reconciled batch");
        if tick.batch_complete {
            if let Err(e) = self.aggregator.aggregate(batch_id).await {
                tracing::error!(batch_id = %batch_id, error = %e, "Report aggregation failed");
            }
        }
        self.store.get_batch(batch_id).await
    }

    /// Bring batches left behind by a crash to a consistent state.
    ///
    /// Must run before any worker of the affected batches is dispatched:
    /// jobs still `Pending` or `Processing` are treated as interrupted.
    pub async fn recover(&self) -> Result<RecoverySummary, BatchError> {
        let mut summary = RecoverySummary::default();

        for batch in self.store.list_batches(BatchStatus::Processing).await? {
            for job in self.store.list_jobs(batch.id).await? {
                if job.status.is_terminal() {
                    continue;
                }
                self.store
                    .set_job_status(
                        job.id,
                        JobStatus::Failed,
                        None,
                        Some("interrupted before completion".to_string()),
                    )
                    .await?;
                summary.interrupted_jobs += 1;
            }

            let tick = self.store.reconcile_batch(batch.id).await?;
            tracing::info!(batch_id = %batch.id, completed = tick.completed, "Reconciled batch");
            if tick.batch_complete {
                self.write_report(batch.id, &mut summary).await;
            }
        }

        for batch in self.store.list_batches(BatchStatus::Completed).await? {
            match self.aggregator.reports().read(batch.id).await {
                Ok(Some(_)) => {}
                Ok(None) => self.write_report(batch.id, &mut summary).await,
                Err(e) => {
                    tracing::warn!(batch_id = %batch.id, error = %e, "Could not check for existing report")
                }
            }
        }

        tracing::info!(
            interrupted_jobs = summary.interrupted_jobs,
            reports_written = summary.reports_written,
            "Recovery finished"
        );
        Ok(summary)
    }

    async fn write_report(&self, batch_id: Uuid, summary: &mut RecoverySummary) {
        match self.aggregator.aggregate(batch_id).await {
            Ok(_) => summary.reports_written += 1,
            Err(e) => tracing::error!(batch_id = %batch_id, error = %e, "Report aggregation failed"),
        }
    }
}
