//! PostgreSQL status store tests.
//!
//! Require a reachable database in DATABASE_URL (migrations are applied).
//! Run with: cargo test --test pg_store_test -- --ignored

use futures::future::join_all;
use image_batch_processor::{
    db::{self, PgStatusStore},
    models::{batch::BatchStatus, job::JobStatus, product::Product},
    services::status_store::{StatusStore, StoreError},
};
use std::sync::Arc;
use uuid::Uuid;

async fn store() -> PgStatusStore {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    PgStatusStore::new(pool)
}

/// Serial numbers are globally unique, so every test run uses fresh ones.
fn product(tag: &str) -> Product {
    Product {
        serial_number: format!("{}-{}", tag, Uuid::new_v4()),
        product_name: format!("Product {}", tag),
        input_locators: vec!["https://img.example/a.jpg".into(), "https://img.example/b.jpg".into()],
        output_paths: Vec::new(),
    }
}

#[tokio::test]
#[ignore]
async fn test_job_lifecycle_and_report_rows() {
    let store = store().await;
    let (batch, jobs) = store
        .create_batch_with_jobs(vec![product("ok"), product("bad")])
        .await
        .expect("Failed to create batch");
    assert_eq!(batch.status, BatchStatus::Processing);
    assert_eq!(batch.expected_job_count, 2);

    let ok = &jobs[0];
    let bad = &jobs[1];
    store
        .set_job_status(ok.id, JobStatus::Processing, None, None)
        .await
        .expect("Failed to start job");
    store
        .set_job_status(
            ok.id,
            JobStatus::Completed,
            Some(vec!["images/a.jpg".into(), "images/b.jpg".into()]),
            None,
        )
        .await
        .expect("Failed to complete job");
    store
        .set_job_status(ok.id, JobStatus::Completed, None, None)
        .await
        .expect("Reapplying terminal status is a no-op");
    assert!(matches!(
        store.set_job_status(ok.id, JobStatus::Processing, None, None).await,
        Err(StoreError::InvalidTransition { .. })
    ));

    store
        .set_job_status(bad.id, JobStatus::Failed, None, Some("b.jpg: timeout".into()))
        .await
        .expect("Failed to fail job");

    let results = store.list_completed_jobs(batch.id).await.expect("Failed to list results");
    assert_eq!(results.len(), 2);
    let ok_row = results.iter().find(|r| r.serial_number == ok.serial_number).unwrap();
    assert_eq!(ok_row.output_paths, vec!["images/a.jpg", "images/b.jpg"]);
    let bad_row = results.iter().find(|r| r.serial_number == bad.serial_number).unwrap();
    assert_eq!(bad_row.status, JobStatus::Failed);
    assert_eq!(bad_row.error.as_deref(), Some("b.jpg: timeout"));
}

#[tokio::test]
#[ignore]
async fn test_duplicate_serial_rolls_back_batch() {
    let store = store().await;
    let existing = product("dup");
    store
        .create_batch_with_jobs(vec![existing.clone()])
        .await
        .expect("Failed to create first batch");

    let fresh = product("fresh");
    let err = store
        .create_batch_with_jobs(vec![fresh.clone(), existing])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateSerial(_)));

    // The rolled-back transaction released the fresh serial.
    store
        .create_batch_with_jobs(vec![fresh])
        .await
        .expect("fresh serial should still be available");
}

#[tokio::test]
#[ignore]
async fn test_concurrent_increments_complete_once() {
    const N: usize = 25;
    let store = Arc::new(store().await);
    let products = (0..N).map(|i| product(&format!("inc{}", i))).collect();
    let (batch, jobs) = store.create_batch_with_jobs(products).await.unwrap();

    let ticks = join_all(jobs.iter().map(|job| {
        let store = store.clone();
        let job_id = job.id;
        async move { store.increment_completed_and_check(batch.id, job_id).await.unwrap() }
    }))
    .await;
    assert_eq!(ticks.iter().filter(|t| t.batch_complete).count(), 1);

    let extra = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
    assert!(!extra.batch_complete);
    assert_eq!(extra.completed, N as u32);
    assert_eq!(store.get_batch(batch.id).await.unwrap().status, BatchStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn test_repeated_increment_counts_job_once() {
    let store = store().await;
    let (batch, jobs) = store
        .create_batch_with_jobs(vec![product("once-a"), product("once-b")])
        .await
        .unwrap();

    let first = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
    let repeat = store.increment_completed_and_check(batch.id, jobs[0].id).await.unwrap();
    assert_eq!(first.completed, 1);
    assert_eq!(repeat.completed, 1);
    assert!(!repeat.batch_complete);
    assert_eq!(store.get_batch(batch.id).await.unwrap().status, BatchStatus::Processing);

    // A job of another batch is not counted here.
    let (_, other) = store.create_batch_with_jobs(vec![product("once-c")]).await.unwrap();
    assert!(matches!(
        store.increment_completed_and_check(batch.id, other[0].id).await,
        Err(StoreError::NotFound { .. })
    ));

    let last = store.increment_completed_and_check(batch.id, jobs[1].id).await.unwrap();
    assert!(last.batch_complete);
    assert_eq!(last.completed, 2);
}

#[tokio::test]
#[ignore]
async fn test_unknown_ids_are_not_found() {
    let store = store().await;
    assert!(matches!(
        store.get_job_status(Uuid::new_v4()).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.increment_completed_and_check(Uuid::new_v4(), Uuid::new_v4()).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.cancel_batch(Uuid::new_v4()).await,
        Err(StoreError::NotFound { .. })
    ));
}
