use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::batch::{Batch, BatchStatus, CompletionTick};
use crate::models::job::{Job, JobStatus};
use crate::models::product::Product;
use crate::models::report::ProcessedResult;
use crate::services::status_store::{check_transition, StatusStore, StoreError};

/// Status store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn create_batch(&self, expected_job_count: u32) -> Result<Batch, StoreError> {
        Ok(queries::insert_batch(&self.pool, expected_job_count).await?)
    }

    async fn create_job(&self, batch_id: Uuid, product: Product) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;
        if queries::get_batch(&mut *tx, batch_id).await?.is_none() {
            return Err(StoreError::batch_not_found(batch_id));
        }
        queries::insert_product(&mut *tx, &product).await?;
        let job = queries::insert_job(&mut *tx, batch_id, &product.serial_number).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn create_batch_with_jobs(
        &self,
        products: Vec<Product>,
    ) -> Result<(Batch, Vec<Job>), StoreError> {
        // Dropping the transaction on any error rolls every insert back.
        let mut tx = self.pool.begin().await?;
        let batch = queries::insert_batch(&mut *tx, products.len() as u32).await?;

        let mut jobs = Vec::with_capacity(products.len());
        for product in &products {
            queries::insert_product(&mut *tx, product).await?;
            jobs.push(queries::insert_job(&mut *tx, batch.id, &product.serial_number).await?);
        }

        tx.commit().await?;
        Ok((batch, jobs))
    }

    async fn set_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        output_paths: Option<Vec<String>>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let job = queries::get_job_for_update(&mut *tx, job_id)
            .await?
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        if !check_transition(job.status, status)? {
            return Ok(());
        }

        queries::update_job_status(&mut *tx, job_id, status, error.as_deref()).await?;
        if status == JobStatus::Completed {
            if let Some(paths) = output_paths {
                queries::update_product_outputs(&mut *tx, &job.serial_number, &paths).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn increment_completed_and_check(
        &self,
        batch_id: Uuid,
        job_id: Uuid,
    ) -> Result<CompletionTick, StoreError> {
        // Batch row first, then the job: the same lock order as reconcile.
        let mut tx = self.pool.begin().await?;
        let batch = queries::get_batch_for_update(&mut *tx, batch_id)
            .await?
            .ok_or_else(|| StoreError::batch_not_found(batch_id))?;

        if !queries::mark_job_counted(&mut *tx, batch_id, job_id).await? {
            let in_batch = queries::get_job(&mut *tx, job_id)
                .await?
                .is_some_and(|job| job.batch_id == batch_id);
            if !in_batch {
                return Err(StoreError::job_not_found(job_id));
            }
            tx.commit().await?;
            return Ok(CompletionTick {
                completed: batch.completed_job_count,
                batch_complete: false,
            });
        }

        let tick = match queries::increment_completed(&mut *tx, batch_id).await? {
            Some((completed, expected)) => CompletionTick {
                completed,
                batch_complete: batch.status == BatchStatus::Processing && completed == expected,
            },
            None => CompletionTick {
                completed: batch.completed_job_count,
                batch_complete: false,
            },
        };
        tx.commit().await?;
        Ok(tick)
    }

    async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        queries::get_job(&self.pool, job_id)
            .await?
            .map(|job| job.status)
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<(Job, Product), StoreError> {
        let job = queries::get_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        let product = queries::get_product(&self.pool, &job.serial_number)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "product",
                id: job.serial_number.clone(),
            })?;
        Ok((job, product))
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        queries::get_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| StoreError::batch_not_found(batch_id))
    }

    async fn list_completed_jobs(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<ProcessedResult>, StoreError> {
        Ok(queries::list_completed_jobs(&self.pool, batch_id).await?)
    }

    async fn list_jobs(&self, batch_id: Uuid) -> Result<Vec<Job>, StoreError> {
        Ok(queries::list_jobs(&self.pool, batch_id).await?)
    }

    async fn list_batches(&self, status: BatchStatus) -> Result<Vec<Batch>, StoreError> {
        Ok(queries::list_batches(&self.pool, status).await?)
    }

    async fn cancel_batch(&self, batch_id: Uuid) -> Result<(), StoreError> {
        if queries::mark_batch_cancelled(&self.pool, batch_id).await? {
            Ok(())
        } else {
            Err(StoreError::batch_not_found(batch_id))
        }
    }

    async fn reconcile_batch(&self, batch_id: Uuid) -> Result<CompletionTick, StoreError> {
        let mut tx = self.pool.begin().await?;
        let batch = queries::get_batch_for_update(&mut *tx, batch_id)
            .await?
            .ok_or_else(|| StoreError::batch_not_found(batch_id))?;
        queries::mark_terminal_jobs_counted(&mut *tx, batch_id).await?;
        let completed = queries::count_counted_jobs(&mut *tx, batch_id)
            .await?
            .min(batch.expected_job_count);

        let batch_complete = batch.status == BatchStatus::Processing
            && completed == batch.expected_job_count;
        let status = if batch_complete {
            BatchStatus::Completed
        } else {
            batch.status
        };
        queries::set_batch_progress(&mut *tx, batch_id, completed, status).await?;
        tx.commit().await?;

        Ok(CompletionTick {
            completed,
            batch_complete,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
