//! One-shot crash recovery: closes out jobs interrupted by a previous run,
//! reconciles batch completion counts and writes any missing reports.
//!
//! Run while no server process is working on the same database.

use std::sync::Arc;

use image_batch_processor::{
    app_state::{self, AppState},
    config::AppConfig,
    db::{self, PgStatusStore},
    services::transform::HttpImageTransform,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL is required for recovery");

    tracing::info!("Connecting to PostgreSQL");
    let pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let reports = app_state::report_store(&config).expect("Failed to initialize report storage");
    let transform = Arc::new(HttpImageTransform::new(&config.image_dir, config.jpeg_quality));
    let state = AppState::new(Arc::new(PgStatusStore::new(pool)), transform, reports, &config);

    match state.coordinator.recover().await {
        Ok(summary) => tracing::info!(
            interrupted_jobs = summary.interrupted_jobs,
            reports_written = summary.reports_written,
            "Recovery complete"
        ),
        Err(e) => {
            tracing::error!(error = %e, "Recovery failed");
            std::process::exit(1);
        }
    }
}
