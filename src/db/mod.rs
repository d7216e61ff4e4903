use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{ImageFormat, ImageJob, NewJob};
use crate::models::operation::OperationRecord;

pub mod memory;
pub mod queries;

pub use memory::MemoryJobRepository;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// `pending -> processing` request. The lease fences later transitions.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub job_id: Uuid,
    pub lease: Uuid,
    pub started_at: DateTime<Utc>,
    pub estimated_ready_at: DateTime<Utc>,
}

/// `processing -> completed` request.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub job_id: Uuid,
    pub lease: Uuid,
    pub processed_key: String,
    pub target_format: ImageFormat,
    pub completed_at: DateTime<Utc>,
}

/// Persistence of jobs and their operations.
///
/// State transitions are conditional: a call that finds the job in the
/// wrong state (or under another lease) changes nothing and reports it.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a job in `pending` together with its full operation list.
    async fn create_job(&self, job: &NewJob) -> Result<ImageJob, RepositoryError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImageJob>, RepositoryError>;

    /// Jobs owned by `owner_id`, newest first.
    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<ImageJob>, RepositoryError>;

    /// Operations of a job in execution order.
    async fn list_operations(&self, job_id: Uuid) -> Result<Vec<OperationRecord>, RepositoryError>;

    /// Returns `None` unless the job was `pending`.
    async fn claim_job(&self, claim: &JobClaim) -> Result<Option<ImageJob>, RepositoryError>;

    /// Returns `None` unless the job was `processing` under `completion.lease`.
    async fn complete_job(
        &self,
        completion: &JobCompletion,
    ) -> Result<Option<ImageJob>, RepositoryError>;

    /// Move a `processing` job to `failed`. With a lease, only if it still matches.
    async fn fail_job(
        &self,
        job_id: Uuid,
        lease: Option<Uuid>,
        reason: &str,
    ) -> Result<bool, RepositoryError>;

    /// Durations of the most recently completed jobs, newest first.
    async fn recent_processing_durations(&self, limit: i64) -> Result<Vec<TimeDelta>, RepositoryError>;

    async fn set_download_expiry(
        &self,
        job_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Jobs whose `download_expires_at <= now`, regardless of state.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ImageJob>, RepositoryError>;

    /// Delete a job and its operations. Returns whether a row existed.
    async fn delete_job(&self, job_id: Uuid) -> Result<bool, RepositoryError>;

    /// Delete a job only if its `download_expires_at <= now`. A download
    /// that renewed the expiry in the meantime keeps it alive.
    async fn delete_expired_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Fail every `processing` job that started before `started_before`.
    async fn fail_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    async fn health_check(&self) -> Result<(), RepositoryError>;
}

/// Postgres-backed repository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_job(&self, job: &NewJob) -> Result<ImageJob, RepositoryError> {
        queries::create_job(&self.pool, job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImageJob>, RepositoryError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<ImageJob>, RepositoryError> {
        queries::list_jobs_for_owner(&self.pool, owner_id).await
    }

    async fn list_operations(&self, job_id: Uuid) -> Result<Vec<OperationRecord>, RepositoryError> {
        queries::list_operations(&self.pool, job_id).await
    }

    async fn claim_job(&self, claim: &JobClaim) -> Result<Option<ImageJob>, RepositoryError> {
        queries::claim_job(&self.pool, claim).await
    }

    async fn complete_job(
        &self,
        completion: &JobCompletion,
    ) -> Result<Option<ImageJob>, RepositoryError> {
        queries::complete_job(&self.pool, completion).await
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        lease: Option<Uuid>,
        reason: &str,
    ) -> Result<bool, RepositoryError> {
        queries::fail_job(&self.pool, job_id, lease, reason).await
    }

    async fn recent_processing_durations(&self, limit: i64) -> Result<Vec<TimeDelta>, RepositoryError> {
        queries::recent_processing_durations(&self.pool, limit).await
    }

    async fn set_download_expiry(
        &self,
        job_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        queries::set_download_expiry(&self.pool, job_id, expires_at).await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ImageJob>, RepositoryError> {
        queries::list_expired(&self.pool, now).await
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool, RepositoryError> {
        queries::delete_job(&self.pool, job_id).await
    }

    async fn delete_expired_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        queries::delete_expired_job(&self.pool, job_id, now).await
    }

    async fn fail_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        queries::fail_stale_processing(&self.pool, started_before, reason).await
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to (de)serialize operation parameters: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),
}
