use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::models::batch::CompletionTick;
use crate::models::job::{Job, JobStatus};
use crate::models::product::Product;
use crate::services::report::ReportAggregator;
use crate::services::status_store::{StatusStore, StoreError};
use crate::services::transform::{ImageTransform, TransformError};

/// Retry knobs for one job.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_attempts_per_image: u32,
    pub retry_backoff: Duration,
    pub persistence_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts_per_image: 3,
            retry_backoff: Duration::from_millis(250),
            persistence_attempts: 5,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_paths: Vec<String> },
    Failed { locator: Option<String>, reason: String },
}

impl JobOutcome {
    fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Drives a single job from `Pending` to a terminal state and reports the
/// terminal state to its batch.
pub struct JobWorker {
    store: Arc<dyn StatusStore>,
    transform: Arc<dyn ImageTransform>,
    aggregator: Arc<ReportAggregator>,
    settings: WorkerSettings,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        transform: Arc<dyn ImageTransform>,
        aggregator: Arc<ReportAggregator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            transform,
            aggregator,
            settings,
        }
    }

    /// Run the job to completion. Never fails: every error ends in a `Failed`
    /// job, and the batch increment happens exactly once on both paths.
    pub async fn run(&self, job: Job, product: Product) -> JobOutcome {
        let started = Instant::now();
        tracing::info!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            serial_number = %product.serial_number,
            images = product.input_locators.len(),
            "Processing job"
        );

        let outcome = match self.store.set_job_status(job.id, JobStatus::Processing, None, None).await {
            Ok(()) => self.process_images(&job, &product).await,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as processing");
                JobOutcome::Failed {
                    locator: None,
                    reason: format!("could not start job: {}", e),
                }
            }
        };

        metrics::histogram!("job_processing_seconds").record(started.elapsed().as_secs_f64());
        match &outcome {
            JobOutcome::Completed { output_paths } => {
                metrics::counter!("jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    batch_id = %job.batch_id,
                    outputs = output_paths.len(),
                    "Job completed"
                );
            }
            JobOutcome::Failed { locator, reason } => {
                metrics::counter!("jobs_failed_total").increment(1);
                tracing::warn!(
                    job_id = %job.id,
                    batch_id = %job.batch_id,
                    locator = ?locator,
                    reason = %reason,
                    "Job failed"
                );
            }
        }

        self.finish(&job, &outcome).await;
        outcome
    }

    /// Transform every image in input order. All images succeed or the job
    /// fails and its partial artifacts are removed.
    async fn process_images(&self, job: &Job, product: &Product) -> JobOutcome {
        let mut output_paths = Vec::with_capacity(product.input_locators.len());

        for locator in &product.input_locators {
            if self.batch_cancelled(job.batch_id).await {
                tracing::info!(job_id = %job.id, batch_id = %job.batch_id, "Batch cancelled, skipping remaining images");
                self.discard_all(&output_paths).await;
                return JobOutcome::Failed {
                    locator: Some(locator.clone()),
                    reason: "batch cancelled".to_string(),
                };
            }

            match self.transform_with_retry(job.id, locator).await {
                Ok(path) => output_paths.push(path),
                Err(e) => {
                    self.discard_all(&output_paths).await;
                    return JobOutcome::Failed {
                        locator: Some(locator.clone()),
                        reason: e.to_string(),
                    };
                }
            }
        }

        JobOutcome::Completed { output_paths }
    }

    async fn transform_with_retry(&self, job_id: Uuid, locator: &str) -> Result<String, TransformError> {
        let max_attempts = self.settings.max_attempts_per_image.max(1);
        let mut attempt = 1;
        loop {
            metrics::counter!("image_transform_attempts_total").increment(1);
            match self.transform.transform(locator).await {
                Ok(path) => {
                    tracing::debug!(job_id = %job_id, locator = %locator, attempt, path = %path, "Image transformed");
                    return Ok(path);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(job_id = %job_id, locator = %locator, attempt, error = %e, "Image transform failed, retrying");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!("image_transform_failures_total").increment(1);
                    tracing::error!(job_id = %job_id, locator = %locator, attempt, error = %e, "Image transform exhausted retries");
                    return Err(e);
                }
            }
        }
    }

    async fn batch_cancelled(&self, batch_id: Uuid) -> bool {
        match self.store.get_batch(batch_id).await {
            Ok(batch) => batch.cancelled,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Could not read batch cancellation flag");
                false
            }
        }
    }

    async fn discard_all(&self, paths: &[String]) {
        for path in paths {
            self.transform.discard(path).await;
        }
    }

    /// Persist the terminal state, then count the job towards its batch and
    /// aggregate if it was the last one. The increment is keyed by job id, so
    /// retrying it after a lost acknowledgement cannot count the job twice.
    async fn finish(&self, job: &Job, outcome: &JobOutcome) {
        let (output_paths, error) = match outcome {
            JobOutcome::Completed { output_paths } => (Some(output_paths.clone()), None),
            JobOutcome::Failed { locator, reason } => (
                None,
                Some(match locator {
                    Some(locator) => format!("{}: {}", locator, reason),
                    None => reason.clone(),
                }),
            ),
        };

        let status = outcome.status();
        let written = self
            .with_store_retry(job.id, "terminal status write", || {
                self.store
                    .set_job_status(job.id, status, output_paths.clone(), error.clone())
            })
            .await;
        if let Err(e) = written {
            // The increment still goes through; recovery reconciles the count
            // against persisted job states if the write is lost.
            tracing::error!(job_id = %job.id, error = %e, "Could not persist terminal job status");
        }

        let tick = self
            .with_store_retry(job.id, "completion increment", || {
                self.store.increment_completed_and_check(job.batch_id, job.id)
            })
            .await;

        match tick {
            Ok(CompletionTick { completed, batch_complete }) => {
                tracing::debug!(job_id = %job.id, batch_id = %job.batch_id, completed, "Counted terminal job");
                if batch_complete {
                    tracing::info!(batch_id = %job.batch_id, completed, "Batch complete, aggregating report");
                    if let Err(e) = self.aggregator.aggregate(job.batch_id).await {
                        tracing::error!(batch_id = %job.batch_id, error = %e, "Report aggregation failed");
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    batch_id = %job.batch_id,
                    error = %e,
                    "Completion increment lost, batch needs reconciliation"
                );
            }
        }
    }

    async fn with_store_retry<T, F, Fut>(&self, job_id: Uuid, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.settings.persistence_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_persistence() && attempt < max_attempts => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Store unavailable during {}, retrying", what);
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
