use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_batch_processor::{
    app_state::{self, AppState},
    config::AppConfig,
    db::{self, PgStatusStore},
    routes,
    services::{
        status_store::{MemoryStatusStore, StatusStore},
        transform::HttpImageTransform,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-batch-processor server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("batches_submitted_total", "Batches accepted for processing");
    metrics::describe_counter!("batches_completed_total", "Batches whose report was written");
    metrics::describe_counter!("jobs_completed_total", "Jobs whose images were all re-encoded");
    metrics::describe_counter!("jobs_failed_total", "Jobs that ended in failure");
    metrics::describe_counter!(
        "image_transform_attempts_total",
        "Image fetch-and-reencode attempts, retries included"
    );
    metrics::describe_counter!(
        "image_transform_failures_total",
        "Images that exhausted their retry attempts"
    );
    metrics::describe_histogram!("job_processing_seconds", "Wall time of one job");

    // Status store: PostgreSQL when configured, in-memory otherwise
    let (store, durable): (Arc<dyn StatusStore>, bool) = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            (Arc::new(PgStatusStore::new(pool)), true)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, job state is kept in memory only");
            (Arc::new(MemoryStatusStore::new()), false)
        }
    };

    let reports = app_state::report_store(&config).expect("Failed to initialize report storage");
    let transform = Arc::new(HttpImageTransform::new(&config.image_dir, config.jpeg_quality));

    let state = AppState::new(store, transform, reports, &config);

    // Nothing is in flight yet, so leftovers of a previous run can be closed out.
    if durable {
        state
            .coordinator
            .recover()
            .await
            .expect("Failed to recover batches from previous run");
    }

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        max_attempts_per_image = config.max_attempts_per_image,
        "Starting image-batch-processor on {}",
        config.bind_addr
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
