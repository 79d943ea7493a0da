use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::batch::{Batch, BatchStatus, CompletionTick};
use crate::models::job::{Job, JobStatus};
use crate::models::product::Product;
use crate::models::report::ProcessedResult;

/// Durable job and batch bookkeeping shared by the coordinator, every job
/// worker and the report aggregator.
///
/// Implementations must be safe for concurrent use from jobs of several
/// batches at once. The only read-modify-write on a batch's completion count
/// is [`StatusStore::increment_completed_and_check`] (and the recovery-only
/// [`StatusStore::reconcile_batch`]).
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Allocate a batch in `Processing` with a zero completion count.
    async fn create_batch(&self, expected_job_count: u32) -> Result<Batch, StoreError>;

    /// Store `product` and allocate its `Pending` job inside `batch_id`.
    async fn create_job(&self, batch_id: Uuid, product: Product) -> Result<Job, StoreError>;

    /// Create a batch and one job per product as a single unit. If any serial
    /// number is already taken nothing is left behind.
    async fn create_batch_with_jobs(
        &self,
        products: Vec<Product>,
    ) -> Result<(Batch, Vec<Job>), StoreError>;

    /// Move a job forward. Reapplying the terminal status a job already holds
    /// is a no-op; any other non-forward move is `InvalidTransition`.
    /// `output_paths` is recorded on the product when the job completes.
    async fn set_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        output_paths: Option<Vec<String>>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Atomically count `job_id` as finished towards its batch. Exactly one
    /// caller per batch sees `batch_complete == true`; the count never exceeds
    /// the expected job count.
    ///
    /// Each job is counted at most once, so a caller that lost the reply of
    /// an earlier attempt can safely repeat the call.
    async fn increment_completed_and_check(
        &self,
        batch_id: Uuid,
        job_id: Uuid,
    ) -> Result<CompletionTick, StoreError>;

    async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<(Job, Product), StoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Batch, StoreError>;

    /// Terminal jobs of one batch, ordered by serial number.
    async fn list_completed_jobs(&self, batch_id: Uuid)
        -> Result<Vec<ProcessedResult>, StoreError>;

    async fn list_jobs(&self, batch_id: Uuid) -> Result<Vec<Job>, StoreError>;

    async fn list_batches(&self, status: BatchStatus) -> Result<Vec<Batch>, StoreError>;

    /// Flag a batch so that in-flight workers stop after their current image.
    async fn cancel_batch(&self, batch_id: Uuid) -> Result<(), StoreError>;

    /// Count every terminal job of the batch that has not been counted yet
    /// and recompute the completion count from the counted jobs.
    /// `batch_complete` is true only for the call that moves the batch from
    /// `Processing` to `Completed`.
    async fn reconcile_batch(&self, batch_id: Uuid) -> Result<CompletionTick, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Serial number already exists: {0}")]
    DuplicateSerial(String),

    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn job_not_found(job_id: Uuid) -> Self {
        Self::NotFound {
            entity: "job",
            id: job_id.to_string(),
        }
    }

    pub fn batch_not_found(batch_id: Uuid) -> Self {
        Self::NotFound {
            entity: "batch",
            id: batch_id.to_string(),
        }
    }

    /// Transient store failures worth retrying.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Database(_))
    }
}

/// Decide what a status write does to a job currently in `current`.
/// `Ok(false)` means the write is an idempotent no-op.
pub(crate) fn check_transition(current: JobStatus, next: JobStatus) -> Result<bool, StoreError> {
    if current == next && current.is_terminal() {
        return Ok(false);
    }
    if !current.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            from: current,
            to: next,
        });
    }
    Ok(true)
}

/// In-process store used when no database is configured, and by tests.
///
/// Every batch row lives in a `DashMap`; mutating it through `get_mut` holds
/// the shard's write guard, which makes the completion increment one
/// indivisible step without a process-wide lock.
///
/// Serial numbers of a new batch are reserved one by one and released again
/// if any of them is taken. Reservations run under `serials`, so a concurrent
/// submission never sees serials of a batch that is about to roll back.
#[derive(Default)]
pub struct MemoryStatusStore {
    batches: DashMap<Uuid, BatchEntry>,
    jobs: DashMap<Uuid, Job>,
    products: DashMap<String, Product>,
    serials: Mutex<()>,
}

/// A batch together with the jobs already counted towards it.
struct BatchEntry {
    batch: Batch,
    counted: HashSet<Uuid>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_job(batch_id: Uuid, serial_number: String) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            batch_id,
            serial_number,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn lock_serials(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.serials.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        match self.products.entry(product.serial_number.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateSerial(product.serial_number)),
            Entry::Vacant(slot) => {
                slot.insert(product);
                Ok(())
            }
        }
    }

    fn product_of(&self, job: &Job) -> Result<Product, StoreError> {
        self.products
            .get(&job.serial_number)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "product",
                id: job.serial_number.clone(),
            })
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create_batch(&self, expected_job_count: u32) -> Result<Batch, StoreError> {
        let now = Utc::now();
        let batch = Batch {
            id: Uuid::new_v4(),
            expected_job_count,
            completed_job_count: 0,
            status: BatchStatus::Processing,
            cancelled: false,
            created_at: now,
            updated_at: now,
        };
        self.batches.insert(
            batch.id,
            BatchEntry {
                batch: batch.clone(),
                counted: HashSet::new(),
            },
        );
        Ok(batch)
    }

    async fn create_job(&self, batch_id: Uuid, product: Product) -> Result<Job, StoreError> {
        if !self.batches.contains_key(&batch_id) {
            return Err(StoreError::batch_not_found(batch_id));
        }
        let job = Self::new_job(batch_id, product.serial_number.clone());
        {
            let _serials = self.lock_serials();
            self.insert_product(product)?;
        }
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn create_batch_with_jobs(
        &self,
        products: Vec<Product>,
    ) -> Result<(Batch, Vec<Job>), StoreError> {
        // Reserve every serial first so a conflict leaves nothing behind.
        let mut reserved: Vec<String> = Vec::with_capacity(products.len());
        {
            let _serials = self.lock_serials();
            for product in &products {
                if let Err(e) = self.insert_product(product.clone()) {
                    for serial in &reserved {
                        self.products.remove(serial);
                    }
                    return Err(e);
                }
                reserved.push(product.serial_number.clone());
            }
        }

        let batch = self.create_batch(products.len() as u32).await?;
        let jobs: Vec<Job> = reserved
            .into_iter()
            .map(|serial| Self::new_job(batch.id, serial))
            .collect();
        for job in &jobs {
            self.jobs.insert(job.id, job.clone());
        }
        Ok((batch, jobs))
    }

    async fn set_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        output_paths: Option<Vec<String>>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        if !check_transition(job.status, status)? {
            return Ok(());
        }

        if status == JobStatus::Completed {
            if let Some(paths) = output_paths {
                if let Some(mut product) = self.products.get_mut(&job.serial_number) {
                    product.output_paths = paths;
                }
            }
        }
        job.status = status;
        job.error = error;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_completed_and_check(
        &self,
        batch_id: Uuid,
        job_id: Uuid,
    ) -> Result<CompletionTick, StoreError> {
        let in_batch = self.jobs.get(&job_id).is_some_and(|job| job.batch_id == batch_id);

        let mut entry = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::batch_not_found(batch_id))?;
        if !in_batch {
            return Err(StoreError::job_not_found(job_id));
        }
        let BatchEntry { batch, counted } = &mut *entry;

        if !counted.insert(job_id) {
            return Ok(CompletionTick {
                completed: batch.completed_job_count,
                batch_complete: false,
            });
        }

        batch.completed_job_count = (counted.len() as u32).min(batch.expected_job_count);
        batch.updated_at = Utc::now();
        let batch_complete = batch.status == BatchStatus::Processing
            && batch.completed_job_count == batch.expected_job_count;
        if batch_complete {
            batch.status = BatchStatus::Completed;
        }
        Ok(CompletionTick {
            completed: batch.completed_job_count,
            batch_complete,
        })
    }

    async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        self.jobs
            .get(&job_id)
            .map(|job| job.status)
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<(Job, Product), StoreError> {
        let job = self
            .jobs
            .get(&job_id)
            .map(|job| job.clone())
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        let product = self.product_of(&job)?;
        Ok((job, product))
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        self.batches
            .get(&batch_id)
            .map(|entry| entry.batch.clone())
            .ok_or_else(|| StoreError::batch_not_found(batch_id))
    }

    async fn list_completed_jobs(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<ProcessedResult>, StoreError> {
        let mut results = Vec::new();
        for job in self.list_jobs(batch_id).await? {
            if !job.status.is_terminal() {
                continue;
            }
            let product = self.product_of(&job)?;
            results.push(ProcessedResult {
                serial_number: product.serial_number,
                product_name: product.product_name,
                input_locators: product.input_locators,
                output_paths: product.output_paths,
                status: job.status,
                error: job.error,
            });
        }
        results.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(results)
    }

    async fn list_jobs(&self, batch_id: Uuid) -> Result<Vec<Job>, StoreError> {
        if !self.batches.contains_key(&batch_id) {
            return Err(StoreError::batch_not_found(batch_id));
        }
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|job| job.batch_id == batch_id)
            .map(|job| job.clone())
            .collect();
        jobs.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(jobs)
    }

    async fn list_batches(&self, status: BatchStatus) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .batches
            .iter()
            .filter(|entry| entry.batch.status == status)
            .map(|entry| entry.batch.clone())
            .collect())
    }

    async fn cancel_batch(&self, batch_id: Uuid) -> Result<(), StoreError> {
        let mut entry = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::batch_not_found(batch_id))?;
        entry.batch.cancelled = true;
        entry.batch.updated_at = Utc::now();
        Ok(())
    }

    async fn reconcile_batch(&self, batch_id: Uuid) -> Result<CompletionTick, StoreError> {
        let terminal: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|job| job.batch_id == batch_id && job.status.is_terminal())
            .map(|job| job.id)
            .collect();

        let mut entry = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::batch_not_found(batch_id))?;
        let BatchEntry { batch, counted } = &mut *entry;
        counted.extend(terminal);
        batch.completed_job_count = (counted.len() as u32).min(batch.expected_job_count);
        batch.updated_at = Utc::now();

        let batch_complete = batch.status == BatchStatus::Processing
            && batch.completed_job_count == batch.expected_job_count;
        if batch_complete {
            batch.status = BatchStatus::Completed;
        }
        Ok(CompletionTick {
            completed: batch.completed_job_count,
            batch_complete,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn product(serial: &str, locators: &[&str]) -> Product {
        Product {
            serial_number: serial.to_string(),
            product_name: format!("Product {}", serial),
            input_locators: locators.iter().map(|l| l.to_string()).collect(),
            output_paths: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_batch_starts_processing_at_zero() {
        let store = MemoryStatusStore::new();
        let batch = store.create_batch(3).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Processing);
        assert_eq!(batch.completed_job_count, 0);
        assert_eq!(batch.expected_job_count, 3);
    }

    #[tokio::test]
    async fn test_create_job_is_pending() {
        let store = MemoryStatusStore::new();
        let batch = store.create_batch(1).await.unwrap();
        let job = store.create_job(batch.id, product("s1", &["u1"])).await.unwrap();
        assert_eq!(store.get_job_status(job.id).await.unwrap(), JobStatus::Pending);
        assert_eq!(job.batch_id, batch.id);
    }

    #[tokio::test]
    async fn test_create_job_rejects_duplicate_serial() {
        let store = MemoryStatusStore::new();
        let batch = store.create_batch(2).await.unwrap();
        store.create_job(batch.id, product("s1", &["u1"])).await.unwrap();
        let err = store
            .create_job(batch.id, product("s1", &["u2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSerial(s) if s == "s1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rolled_back_submission_does_not_block_concurrent_one() {
        let store = Arc::new(MemoryStatusStore::new());
        store
            .create_batch_with_jobs(vec![product("taken", &["u0"])])
            .await
            .unwrap();

        for round in 0..50 {
            let shared = format!("shared{}", round);
            let doomed = {
                let store = store.clone();
                let products = vec![product(&shared, &["u1"]), product("taken", &["u2"])];
                tokio::spawn(async move { store.create_batch_with_jobs(products).await })
            };
            let clean = {
                let store = store.clone();
                let products = vec![product(&shared, &["u3"])];
                tokio::spawn(async move { store.create_batch_with_jobs(products).await })
            };

            assert!(doomed.await.unwrap().is_err());
            // Either it ran first and found the serial free, or the doomed
            // batch already released it.
            clean.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_batch_with_jobs_rolls_back_on_duplicate() {
        let store = MemoryStatusStore::new();
        store
            .create_batch_with_jobs(vec![product("taken", &["u1"])])
            .await
            .unwrap();

        let err = store
            .create_batch_with_jobs(vec![product("fresh", &["u2"]), product("taken", &["u3"])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSerial(_)));

        // "fresh" was released again and no extra batch or job exists.
        assert_eq!(store.list_batches(BatchStatus::Processing).await.unwrap().len(), 1);
        assert_eq!(store.jobs.len(), 1);
        store
            .create_batch_with_jobs(vec![product("fresh", &["u2"])])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = MemoryStatusStore::new();
        let err = store.get_job_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "job", .. }));

        let err = store
            .set_job_status(Uuid::new_v4(), JobStatus::Processing, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_transitions_are_monotonic_and_idempotent() {
        let store = MemoryStatusStore::new();
        let (_, jobs) = store
            .create_batch_with_jobs(vec![product("s1", &["u1", "u2"])])
            .await
            .unwrap();
        let job_id = jobs[0].id;

        store
            .set_job_status(job_id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        store
            .set_job_status(
                job_id,
                JobStatus::Completed,
                Some(vec!["o1".to_string(), "o2".to_string()]),
                None,
            )
            .await
            .unwrap();

        // Reapplying the same terminal status is a no-op.
        store
            .set_job_status(job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();

        let err = store
            .set_job_status(job_id, JobStatus::Processing, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = store
            .set_job_status(job_id, JobStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let (job, product) = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(product.output_paths, vec!["o1", "o2"]);
    }

    fn products(prefix: &str, n: usize) -> Vec<Product> {
        (0..n)
            .map(|i| product(&format!("{}{}", prefix, i), &["u"]))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_complete_exactly_once() {
        const N: usize = 200;
        let store = Arc::new(MemoryStatusStore::new());
        let (batch, jobs) = store.create_batch_with_jobs(products("s", N)).await.unwrap();

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let store = store.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    store.increment_completed_and_check(batch.id, job.id).await.unwrap()
                })
            })
            .collect();

        let ticks = futures::future::join_all(handles).await;
        let completions = ticks
            .iter()
            .filter(|t| t.as_ref().unwrap().batch_complete)
            .count();
        assert_eq!(completions, 1);

        let batch = store.get_batch(batch.id).await.unwrap();
        assert_eq!(batch.completed_job_count, N as u32);
        assert_eq!(batch.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_increment_counts_job_once() {
        let store = MemoryStatusStore::new();
        let (batch, jobs) = store.create_batch_with_jobs(products("s", 2)).await.unwrap();

        let first = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
        let repeat = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
        assert_eq!(first.completed, 1);
        assert!(!repeat.batch_complete);
        assert_eq!(repeat.completed, 1);
        assert_eq!(store.get_batch(batch.id).await.unwrap().status, BatchStatus::Processing);

        let last = store.increment_completed_and_check(batch.id, jobs[1].id).await.unwrap();
        assert!(last.batch_complete);
        assert_eq!(last.completed, 2);
        let after = store.increment_completed_and_check(batch.id, jobs[1].id).await.unwrap();
        assert!(!after.batch_complete);
        assert_eq!(after.completed, 2);
    }

    #[tokio::test]
    async fn test_increment_rejects_job_of_other_batch() {
        let store = MemoryStatusStore::new();
        let (a, _) = store.create_batch_with_jobs(products("a", 1)).await.unwrap();
        let (_, b_jobs) = store.create_batch_with_jobs(products("b", 1)).await.unwrap();

        let err = store
            .increment_completed_and_check(a.id, b_jobs[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "job", .. }));
        let err = store
            .increment_completed_and_check(Uuid::new_v4(), b_jobs[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "batch", .. }));
        assert_eq!(store.get_batch(a.id).await.unwrap().completed_job_count, 0);
    }

    #[tokio::test]
    async fn test_batches_count_independently() {
        let store = MemoryStatusStore::new();
        let (a, a_jobs) = store.create_batch_with_jobs(products("a", 2)).await.unwrap();
        let (b, b_jobs) = store.create_batch_with_jobs(products("b", 1)).await.unwrap();

        assert!(!store.increment_completed_and_check(a.id, a_jobs[0].id).await.unwrap().batch_complete);
        assert!(store.increment_completed_and_check(b.id, b_jobs[0].id).await.unwrap().batch_complete);
        assert_eq!(store.get_batch(a.id).await.unwrap().status, BatchStatus::Processing);
        assert!(store.increment_completed_and_check(a.id, a_jobs[1].id).await.unwrap().batch_complete);
    }

    #[tokio::test]
    async fn test_list_completed_jobs_only_covers_terminal_jobs_of_batch() {
        let store = MemoryStatusStore::new();
        let (batch, jobs) = store
            .create_batch_with_jobs(vec![product("b", &["u1"]), product("a", &["u2"])])
            .await
            .unwrap();
        store
            .create_batch_with_jobs(vec![product("other", &["u3"])])
            .await
            .unwrap();

        let job_b = jobs.iter().find(|j| j.serial_number == "b").unwrap();
        let job_a = jobs.iter().find(|j| j.serial_number == "a").unwrap();
        store
            .set_job_status(job_b.id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        store
            .set_job_status(job_b.id, JobStatus::Failed, None, Some("u1".to_string()))
            .await
            .unwrap();

        let results = store.list_completed_jobs(batch.id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].serial_number, "b");
        assert_eq!(results[0].status, JobStatus::Failed);

        store
            .set_job_status(job_a.id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        store
            .set_job_status(job_a.id, JobStatus::Completed, Some(vec!["o2".into()]), None)
            .await
            .unwrap();
        let results = store.list_completed_jobs(batch.id).await.unwrap();
        let serials: Vec<_> = results.iter().map(|r| r.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_reconcile_recounts_terminal_jobs_and_fires_once() {
        let store = MemoryStatusStore::new();
        let (batch, jobs) = store
            .create_batch_with_jobs(vec![product("s1", &["u1"]), product("s2", &["u2"])])
            .await
            .unwrap();
        for job in &jobs {
            store
                .set_job_status(job.id, JobStatus::Failed, None, Some("interrupted".into()))
                .await
                .unwrap();
        }

        // Terminal writes landed but no increments did.
        let tick = store.reconcile_batch(batch.id).await.unwrap();
        assert_eq!(tick.completed, 2);
        assert!(tick.batch_complete);

        let again = store.reconcile_batch(batch.id).await.unwrap();
        assert!(!again.batch_complete);
        assert!(!store
            .increment_completed_and_check(batch.id, jobs[0].id)
            .await
            .unwrap()
            .batch_complete);
    }

    #[tokio::test]
    async fn test_reconcile_and_late_increment_do_not_double_count() {
        let store = MemoryStatusStore::new();
        let (batch, jobs) = store.create_batch_with_jobs(products("s", 3)).await.unwrap();
        store
            .set_job_status(jobs[0].id, JobStatus::Failed, None, Some("gone".into()))
            .await
            .unwrap();

        // Reconciliation runs before the worker of job 0 got to count it.
        let tick = store.reconcile_batch(batch.id).await.unwrap();
        assert_eq!(tick.completed, 1);
        let late = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
        assert_eq!(late.completed, 1);

        assert!(!store.increment_completed_and_check(batch.id, jobs[1].id).await.unwrap().batch_complete);
        assert!(store.increment_completed_and_check(batch.id, jobs[2].id).await.unwrap().batch_complete);
    }

    #[tokio::test]
    async fn test_cancel_batch_sets_flag() {
        let store = MemoryStatusStore::new();
        let batch = store.create_batch(1).await.unwrap();
        store.cancel_batch(batch.id).await.unwrap();
        assert!(store.get_batch(batch.id).await.unwrap().cancelled);
        assert!(store.cancel_batch(Uuid::new_v4()).await.is_err());
    }
}
