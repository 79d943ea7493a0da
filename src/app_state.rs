use std::sync::Arc;

use crate::config::{AppConfig, ReportBackend};
use crate::services::{
    coordinator::BatchCoordinator,
    report::{FsReportStore, ReportAggregator, ReportStore},
    status_store::StatusStore,
    storage::{R2ReportStore, StorageError},
    transform::ImageTransform,
    worker::JobWorker,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub reports: Arc<dyn ReportStore>,
    pub coordinator: Arc<BatchCoordinator>,
}

impl AppState {
    /// Wire the aggregator, worker and coordinator around the given
    /// collaborators.
    pub fn new(
        store: Arc<dyn StatusStore>,
        transform: Arc<dyn ImageTransform>,
        reports: Arc<dyn ReportStore>,
        config: &AppConfig,
    ) -> Self {
        let aggregator = Arc::new(ReportAggregator::new(store.clone(), reports.clone()));
        let worker = Arc::new(JobWorker::new(
            store.clone(),
            transform,
            aggregator.clone(),
            config.worker_settings(),
        ));
        let coordinator = Arc::new(BatchCoordinator::new(
            store.clone(),
            worker,
            aggregator,
            config.max_concurrent_jobs,
        ));

        Self {
            store,
            reports,
            coordinator,
        }
    }
}

/// Build the configured report backend.
pub fn report_store(config: &AppConfig) -> Result<Arc<dyn ReportStore>, StorageError> {
    match (config.report_backend, config.r2_settings()) {
        (ReportBackend::R2, Some(r2)) => Ok(Arc::new(R2ReportStore::new(
            r2.bucket,
            r2.endpoint,
            r2.access_key,
            r2.secret_key,
        )?)),
        (ReportBackend::R2, None) => Err(StorageError::Config(
            "r2 report backend selected without credentials".to_string(),
        )),
        (ReportBackend::Filesystem, _) => Ok(Arc::new(FsReportStore::new(&config.output_dir))),
    }
}
