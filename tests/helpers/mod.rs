//! Test helpers: scripted collaborators and a wired-up in-memory service.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use image_batch_processor::{
    app_state::AppState,
    config::AppConfig,
    models::{batch::BatchStatus, product::ProductRow},
    services::{
        report::{ReportError, ReportStore},
        status_store::{MemoryStatusStore, StatusStore},
        transform::{ImageTransform, TransformError},
    },
};

/// Transform that never touches the network. Locators starting with `bad`
/// always fail; everything else succeeds after a short, locator-dependent
/// delay so jobs finish in a scrambled order.
///
/// `peak_in_flight` records the most transforms ever running at once.
#[derive(Default)]
pub struct FakeTransform {
    pub attempts: DashMap<String, u32>,
    pub discarded: DashMap<String, ()>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeTransform {
    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageTransform for FakeTransform {
    async fn transform(&self, source_locator: &str) -> Result<String, TransformError> {
        *self.attempts.entry(source_locator.to_string()).or_insert(0) += 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let mut hasher = DefaultHasher::new();
        source_locator.hash(&mut hasher);
        tokio::time::sleep(Duration::from_millis(2 + hasher.finish() % 10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if source_locator.starts_with("bad") {
            return Err(TransformError::Decode(format!("{} is not an image", source_locator)));
        }
        Ok(format!("images/{}.jpg", source_locator))
    }

    async fn discard(&self, artifact_path: &str) {
        self.discarded.insert(artifact_path.to_string(), ());
    }
}

/// Report store that keeps reports in memory and counts writes per batch.
#[derive(Default)]
pub struct RecordingReports {
    pub contents: DashMap<Uuid, Vec<u8>>,
    pub writes: DashMap<Uuid, u32>,
}

impl RecordingReports {
    pub fn report(&self, batch_id: Uuid) -> Option<String> {
        self.contents
            .get(&batch_id)
            .map(|c| String::from_utf8_lossy(&c).into_owned())
    }

    pub fn write_count(&self, batch_id: Uuid) -> u32 {
        self.writes.get(&batch_id).map(|w| *w).unwrap_or(0)
    }
}

#[async_trait]
impl ReportStore for RecordingReports {
    fn location(&self, batch_id: Uuid) -> String {
        format!("memory://{}", batch_id)
    }

    async fn write(&self, batch_id: Uuid, contents: &[u8]) -> Result<String, ReportError> {
        self.contents.insert(batch_id, contents.to_vec());
        *self.writes.entry(batch_id).or_insert(0) += 1;
        Ok(self.location(batch_id))
    }

    async fn read(&self, batch_id: Uuid) -> Result<Option<Vec<u8>>, ReportError> {
        Ok(self.contents.get(&batch_id).map(|c| c.clone()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStatusStore>,
    pub transform: Arc<FakeTransform>,
    pub reports: Arc<RecordingReports>,
    pub state: AppState,
}

pub fn test_config(max_concurrent_jobs: usize) -> AppConfig {
    envy::from_iter([
        ("MAX_CONCURRENT_JOBS".to_string(), max_concurrent_jobs.to_string()),
        ("MAX_ATTEMPTS_PER_IMAGE".to_string(), "2".to_string()),
        ("RETRY_BACKOFF_MS".to_string(), "1".to_string()),
    ])
    .expect("test config")
}

pub fn harness(max_concurrent_jobs: usize) -> Harness {
    let store = Arc::new(MemoryStatusStore::new());
    let transform = Arc::new(FakeTransform::default());
    let reports = Arc::new(RecordingReports::default());
    let state = AppState::new(
        store.clone(),
        transform.clone(),
        reports.clone(),
        &test_config(max_concurrent_jobs),
    );
    Harness {
        store,
        transform,
        reports,
        state,
    }
}

pub fn row(serial: &str, name: &str, locators: &[&str]) -> ProductRow {
    ProductRow {
        serial_number: serial.to_string(),
        product_name: name.to_string(),
        input_locators: locators.iter().map(|l| l.to_string()).collect(),
    }
}

/// Wait until the batch is complete and its report has been written.
pub async fn wait_for_report(harness: &Harness, batch_id: Uuid) -> String {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let batch = harness.store.get_batch(batch_id).await.expect("batch exists");
            if batch.status == BatchStatus::Completed {
                if let Some(report) = harness.reports.report(batch_id) {
                    return report;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("batch did not finish in time")
}
