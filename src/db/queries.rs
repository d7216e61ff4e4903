use chrono::{DateTime, TimeDelta, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{JobClaim, JobCompletion, RepositoryError};
use crate::models::job::{ImageFormat, ImageJob, JobStatus, NewJob};
use crate::models::operation::{Operation, OperationRecord};

const JOB_COLUMNS: &str = r#"
    id, owner_id, source_key, processed_key, target_format, status, failure_reason,
    created_at, processing_started_at, processing_completed_at, estimated_ready_at,
    download_expires_at
"#;

fn job_from_row(row: &PgRow) -> Result<ImageJob, RepositoryError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| RepositoryError::Corrupt(format!("unknown status '{}'", status_str)))?;

    let format_str: String = row.try_get("target_format")?;
    let target_format = ImageFormat::from_str(&format_str)
        .map_err(|_| RepositoryError::Corrupt(format!("unknown format '{}'", format_str)))?;

    Ok(ImageJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        source_key: row.try_get("source_key")?,
        processed_key: row.try_get("processed_key")?,
        target_format,
        status,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        processing_completed_at: row.try_get("processing_completed_at")?,
        estimated_ready_at: row.try_get("estimated_ready_at")?,
        download_expires_at: row.try_get("download_expires_at")?,
    })
}

/// Insert a new job and its operations in one transaction.
///
/// Operation `created_at` values are spaced one microsecond apart in
/// submission order, so ordering by creation time reproduces the list.
pub async fn create_job(pool: &PgPool, job: &NewJob) -> Result<ImageJob, RepositoryError> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        r#"
        INSERT INTO image_jobs (id, owner_id, source_key, target_format, status, created_at, download_expires_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6)
        RETURNING {JOB_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(job.id)
        .bind(job.owner_id.as_deref())
        .bind(&job.source_key)
        .bind(job.target_format.as_ref())
        .bind(job.created_at)
        .bind(job.download_expires_at)
        .fetch_one(&mut *tx)
        .await?;

    for (position, operation) in job.operations.iter().enumerate() {
        let created_at = job.created_at + TimeDelta::microseconds(position as i64);
        sqlx::query(
            r#"
            INSERT INTO image_operations (id, job_id, position, operation_type, parameters, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.id)
        .bind(position as i32)
        .bind(operation.kind().as_ref())
        .bind(operation.parameters()?)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
    }

    let created = job_from_row(&row)?;
    tx.commit().await?;
    Ok(created)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<ImageJob>, RepositoryError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM image_jobs WHERE id = $1");
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn list_jobs_for_owner(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Vec<ImageJob>, RepositoryError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM image_jobs WHERE owner_id = $1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&sql).bind(owner_id).fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

/// Operations of a job ordered by creation time.
pub async fn list_operations(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Vec<OperationRecord>, RepositoryError> {
    let rows = sqlx::query(
        r#"
        SELECT id, job_id, position, operation_type, parameters, created_at
        FROM image_operations
        WHERE job_id = $1
        ORDER BY created_at ASC, position ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let kind: String = r.try_get("operation_type")?;
            let parameters: serde_json::Value = r.try_get("parameters")?;
            Ok(OperationRecord {
                id: r.try_get("id")?,
                job_id: r.try_get("job_id")?,
                position: r.try_get("position")?,
                operation: Operation::from_stored(&kind, parameters)?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect()
}

/// Move a pending job to processing under a fresh lease.
pub async fn claim_job(pool: &PgPool, claim: &JobClaim) -> Result<Option<ImageJob>, RepositoryError> {
    let sql = format!(
        r#"
        UPDATE image_jobs
        SET status = 'processing',
            processing_started_at = $2,
            estimated_ready_at = $3,
            lease_token = $4
        WHERE id = $1 AND status = 'pending'
        RETURNING {JOB_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(claim.job_id)
        .bind(claim.started_at)
        .bind(claim.estimated_ready_at)
        .bind(claim.lease)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn complete_job(
    pool: &PgPool,
    completion: &JobCompletion,
) -> Result<Option<ImageJob>, RepositoryError> {
    let sql = format!(
        r#"
        UPDATE image_jobs
        SET status = 'completed',
            processed_key = $3,
            target_format = $4,
            processing_completed_at = $5,
            estimated_ready_at = NULL,
            lease_token = NULL
        WHERE id = $1 AND status = 'processing' AND lease_token = $2
        RETURNING {JOB_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(completion.job_id)
        .bind(completion.lease)
        .bind(&completion.processed_key)
        .bind(completion.target_format.as_ref())
        .bind(completion.completed_at)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn fail_job(
    pool: &PgPool,
    job_id: Uuid,
    lease: Option<Uuid>,
    reason: &str,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"
        UPDATE image_jobs
        SET status = 'failed',
            failure_reason = $3,
            estimated_ready_at = NULL,
            lease_token = NULL
        WHERE id = $1
          AND status = 'processing'
          AND ($2::uuid IS NULL OR lease_token = $2)
        "#,
    )
    .bind(job_id)
    .bind(lease)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Processing durations of the most recently completed jobs.
pub async fn recent_processing_durations(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<TimeDelta>, RepositoryError> {
    let rows = sqlx::query(
        r#"
        SELECT processing_started_at, processing_completed_at
        FROM image_jobs
        WHERE status = 'completed'
          AND processing_started_at IS NOT NULL
          AND processing_completed_at IS NOT NULL
        ORDER BY processing_completed_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let started: DateTime<Utc> = r.try_get("processing_started_at")?;
            let completed: DateTime<Utc> = r.try_get("processing_completed_at")?;
            Ok(completed - started)
        })
        .collect()
}

pub async fn set_download_expiry(
    pool: &PgPool,
    job_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query("UPDATE image_jobs SET download_expires_at = $2 WHERE id = $1")
        .bind(job_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Jobs eligible for reaping
pub async fn list_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<ImageJob>, RepositoryError> {
    let sql = format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM image_jobs
        WHERE download_expires_at <= $1
        ORDER BY download_expires_at ASC
        "#
    );
    let rows = sqlx::query(&sql).bind(now).fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

pub async fn delete_job(pool: &PgPool, job_id: Uuid) -> Result<bool, RepositoryError> {
    let result = sqlx::query("DELETE FROM image_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Reaper delete: a no-op when a download renewed the expiry after listing
pub async fn delete_expired_job(
    pool: &PgPool,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query("DELETE FROM image_jobs WHERE id = $1 AND download_expires_at <= $2")
        .bind(job_id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fail_stale_processing(
    pool: &PgPool,
    started_before: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<Uuid>, RepositoryError> {
    let rows = sqlx::query(
        r#"
        UPDATE image_jobs
        SET status = 'failed',
            failure_reason = $2,
            estimated_ready_at = NULL,
            lease_token = NULL
        WHERE status = 'processing' AND processing_started_at < $1
        RETURNING id
        "#,
    )
    .bind(started_before)
    .bind(reason)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| r.try_get::<Uuid, _>("id").map_err(RepositoryError::from))
        .collect()
}
