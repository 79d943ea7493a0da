use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::models::batch::{Batch, BatchStatus};
use crate::models::job::{Job, JobStatus};
use crate::models::product::Product;
use crate::models::report::ProcessedResult;
use crate::services::status_store::StoreError;

const BATCH_COLUMNS: &str =
    "id, expected_job_count, completed_job_count, status, cancelled, created_at, updated_at";
const JOB_COLUMNS: &str = "id, batch_id, serial_number, status, error, created_at, updated_at";

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn batch_from_row(row: &PgRow) -> Result<Batch, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let expected: i32 = row.try_get("expected_job_count")?;
    let completed: i32 = row.try_get("completed_job_count")?;
    Ok(Batch {
        id: row.try_get("id")?,
        expected_job_count: expected as u32,
        completed_job_count: completed as u32,
        status: status.parse::<BatchStatus>().map_err(decode_err)?,
        cancelled: row.try_get("cancelled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        serial_number: row.try_get("serial_number")?,
        status: status.parse::<JobStatus>().map_err(decode_err)?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        serial_number: row.try_get("serial_number")?,
        product_name: row.try_get("product_name")?,
        input_locators: row.try_get("input_image_urls")?,
        output_paths: row.try_get("output_image_urls")?,
    })
}

/// Insert a new batch in `processing`
pub async fn insert_batch<'e, E: PgExecutor<'e>>(
    executor: E,
    expected_job_count: u32,
) -> Result<Batch, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO batches (id, expected_job_count) VALUES ($1, $2) RETURNING {}",
        BATCH_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(expected_job_count as i32)
    .fetch_one(executor)
    .await?;

    batch_from_row(&row)
}

/// Insert a product snapshot, mapping the serial number's unique index to
/// `DuplicateSerial`
pub async fn insert_product<'e, E: PgExecutor<'e>>(
    executor: E,
    product: &Product,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO products (serial_number, product_name, input_image_urls)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(&product.serial_number)
    .bind(&product.product_name)
    .bind(&product.input_locators)
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::DuplicateSerial(product.serial_number.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Insert a pending job for an existing product
pub async fn insert_job<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
    serial_number: &str,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO jobs (id, batch_id, serial_number) VALUES ($1, $2, $3) RETURNING {}",
        JOB_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(batch_id)
    .bind(serial_number)
    .fetch_one(executor)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Get a job by ID, locking its row until the transaction ends
pub async fn get_job_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
        JOB_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

pub async fn get_product<'e, E: PgExecutor<'e>>(
    executor: E,
    serial_number: &str,
) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT serial_number, product_name, input_image_urls, output_image_urls
        FROM products
        WHERE serial_number = $1
        "#,
    )
    .bind(serial_number)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(product_from_row).transpose()
}

/// Update job status and failure detail
pub async fn update_job_status<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1,
            error = $2,
            updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(status.to_string())
    .bind(error)
    .bind(job_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Record a completed job's artifacts on its product
pub async fn update_product_outputs<'e, E: PgExecutor<'e>>(
    executor: E,
    serial_number: &str,
    output_paths: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE products SET output_image_urls = $1 WHERE serial_number = $2")
        .bind(output_paths)
        .bind(serial_number)
        .execute(executor)
        .await?;

    Ok(())
}

/// Flag a job of `batch_id` as counted. Returns false when the job was
/// already counted or does not belong to the batch.
pub async fn mark_job_counted<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
    job_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET counted = TRUE
        WHERE id = $1 AND batch_id = $2 AND NOT counted
        "#,
    )
    .bind(job_id)
    .bind(batch_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count one more job in a single conditional update, flipping the batch to
/// `completed` when the count reaches `expected_job_count`.
///
/// Returns `None` when the batch is missing or already fully counted.
pub async fn increment_completed<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<Option<(u32, u32)>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE batches
        SET completed_job_count = completed_job_count + 1,
            status = CASE
                WHEN status = 'processing'
                     AND completed_job_count + 1 = expected_job_count THEN 'completed'
                ELSE status
            END,
            updated_at = NOW()
        WHERE id = $1 AND completed_job_count < expected_job_count
        RETURNING completed_job_count, expected_job_count
        "#,
    )
    .bind(batch_id)
    .fetch_optional(executor)
    .await?;

    row.map(|r| {
        let completed: i32 = r.try_get("completed_job_count")?;
        let expected: i32 = r.try_get("expected_job_count")?;
        Ok::<_, sqlx::Error>((completed as u32, expected as u32))
    })
    .transpose()
}

pub async fn get_batch<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<Option<Batch>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM batches WHERE id = $1", BATCH_COLUMNS))
        .bind(batch_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

pub async fn get_batch_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<Option<Batch>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batches WHERE id = $1 FOR UPDATE",
        BATCH_COLUMNS
    ))
    .bind(batch_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(batch_from_row).transpose()
}

pub async fn list_batches<'e, E: PgExecutor<'e>>(
    executor: E,
    status: BatchStatus,
) -> Result<Vec<Batch>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM batches WHERE status = $1 ORDER BY created_at ASC",
        BATCH_COLUMNS
    ))
    .bind(status.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(batch_from_row).collect()
}

pub async fn list_jobs<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM jobs WHERE batch_id = $1 ORDER BY serial_number ASC",
        JOB_COLUMNS
    ))
    .bind(batch_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Terminal jobs of a batch joined with their products
pub async fn list_completed_jobs<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<Vec<ProcessedResult>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT p.serial_number, p.product_name, p.input_image_urls, p.output_image_urls,
               j.status, j.error
        FROM jobs j
        JOIN products p ON p.serial_number = j.serial_number
        WHERE j.batch_id = $1
          AND j.status IN ('completed', 'failed')
        ORDER BY p.serial_number ASC
        "#,
    )
    .bind(batch_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|r| {
            let product = product_from_row(r)?;
            let status: String = r.try_get("status")?;
            Ok::<_, sqlx::Error>(ProcessedResult {
                serial_number: product.serial_number,
                product_name: product.product_name,
                input_locators: product.input_locators,
                output_paths: product.output_paths,
                status: status.parse::<JobStatus>().map_err(decode_err)?,
                error: r.try_get("error")?,
            })
        })
        .collect()
}

/// Flag every terminal, not yet counted job of a batch as counted
pub async fn mark_terminal_jobs_counted<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET counted = TRUE
        WHERE batch_id = $1
          AND status IN ('completed', 'failed')
          AND NOT counted
        "#,
    )
    .bind(batch_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn count_counted_jobs<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<u32, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS counted FROM jobs WHERE batch_id = $1 AND counted")
        .bind(batch_id)
        .fetch_one(executor)
        .await?;

    let counted: i64 = row.try_get("counted")?;
    Ok(counted as u32)
}

/// Overwrite the completion count and status; recovery only
pub async fn set_batch_progress<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
    completed_job_count: u32,
    status: BatchStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE batches
        SET completed_job_count = $1,
            status = $2,
            updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(completed_job_count as i32)
    .bind(status.to_string())
    .bind(batch_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Returns false when the batch does not exist
pub async fn mark_batch_cancelled<'e, E: PgExecutor<'e>>(
    executor: E,
    batch_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE batches SET cancelled = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(batch_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}
