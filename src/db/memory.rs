//! In-memory [`JobRepository`] used by tests and local simulations.
//!
//! Mirrors the conditional-update semantics of the Postgres queries.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{JobClaim, JobCompletion, JobRepository, RepositoryError};
use crate::models::job::{ImageJob, JobStatus, NewJob};
use crate::models::operation::OperationRecord;

struct StoredJob {
    job: ImageJob,
    lease: Option<Uuid>,
    operations: Vec<OperationRecord>,
}

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, StoredJob>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an arbitrary record, bypassing the state machine.
    pub fn insert_raw(&self, job: ImageJob) {
        self.lock().insert(
            job.id,
            StoredJob {
                job,
                lease: None,
                operations: Vec::new(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, StoredJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create_job(&self, new: &NewJob) -> Result<ImageJob, RepositoryError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&new.id) {
            return Err(RepositoryError::Duplicate(new.id));
        }

        let job = ImageJob {
            id: new.id,
            owner_id: new.owner_id.clone(),
            source_key: new.source_key.clone(),
            processed_key: None,
            target_format: new.target_format,
            status: JobStatus::Pending,
            failure_reason: None,
            created_at: new.created_at,
            processing_started_at: None,
            processing_completed_at: None,
            estimated_ready_at: None,
            download_expires_at: Some(new.download_expires_at),
        };

        let operations = new
            .operations
            .iter()
            .enumerate()
            .map(|(position, operation)| OperationRecord {
                id: Uuid::new_v4(),
                job_id: new.id,
                position: position as i32,
                operation: *operation,
                created_at: new.created_at + TimeDelta::microseconds(position as i64),
            })
            .collect();

        jobs.insert(
            new.id,
            StoredJob {
                job: job.clone(),
                lease: None,
                operations,
            },
        );
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImageJob>, RepositoryError> {
        Ok(self.lock().get(&job_id).map(|s| s.job.clone()))
    }

    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<ImageJob>, RepositoryError> {
        let mut jobs: Vec<ImageJob> = self
            .lock()
            .values()
            .filter(|s| s.job.owner_id.as_deref() == Some(owner_id))
            .map(|s| s.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_operations(&self, job_id: Uuid) -> Result<Vec<OperationRecord>, RepositoryError> {
        let mut operations = self
            .lock()
            .get(&job_id)
            .map(|s| s.operations.clone())
            .unwrap_or_default();
        operations.sort_by_key(|op| (op.created_at, op.position));
        Ok(operations)
    }

    async fn claim_job(&self, claim: &JobClaim) -> Result<Option<ImageJob>, RepositoryError> {
        let mut jobs = self.lock();
        let Some(stored) = jobs.get_mut(&claim.job_id) else {
            return Ok(None);
        };
        if stored.job.status != JobStatus::Pending {
            return Ok(None);
        }

        stored.job.status = JobStatus::Processing;
        stored.job.processing_started_at = Some(claim.started_at);
        stored.job.estimated_ready_at = Some(claim.estimated_ready_at);
        stored.lease = Some(claim.lease);
        Ok(Some(stored.job.clone()))
    }

    async fn complete_job(
        &self,
        completion: &JobCompletion,
    ) -> Result<Option<ImageJob>, RepositoryError> {
        let mut jobs = self.lock();
        let Some(stored) = jobs.get_mut(&completion.job_id) else {
            return Ok(None);
        };
        if stored.job.status != JobStatus::Processing || stored.lease != Some(completion.lease) {
            return Ok(None);
        }

        stored.job.status = JobStatus::Completed;
        stored.job.processed_key = Some(completion.processed_key.clone());
        stored.job.target_format = completion.target_format;
        stored.job.processing_completed_at = Some(completion.completed_at);
        stored.job.estimated_ready_at = None;
        stored.lease = None;
        Ok(Some(stored.job.clone()))
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        lease: Option<Uuid>,
        reason: &str,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.lock();
        let Some(stored) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if stored.job.status != JobStatus::Processing {
            return Ok(false);
        }
        if lease.is_some() && stored.lease != lease {
            return Ok(false);
        }

        stored.job.status = JobStatus::Failed;
        stored.job.failure_reason = Some(reason.to_string());
        stored.job.estimated_ready_at = None;
        stored.lease = None;
        Ok(true)
    }

    async fn recent_processing_durations(&self, limit: i64) -> Result<Vec<TimeDelta>, RepositoryError> {
        let mut finished: Vec<(DateTime<Utc>, DateTime<Utc>)> = self
            .lock()
            .values()
            .filter(|s| s.job.status == JobStatus::Completed)
            .filter_map(|s| Some((s.job.processing_started_at?, s.job.processing_completed_at?)))
            .collect();
        finished.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(finished
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(started, completed)| completed - started)
            .collect())
    }

    async fn set_download_expiry(
        &self,
        job_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.lock().get_mut(&job_id) {
            Some(stored) => {
                stored.job.download_expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ImageJob>, RepositoryError> {
        let mut expired: Vec<ImageJob> = self
            .lock()
            .values()
            .filter(|s| s.job.is_reapable(now))
            .map(|s| s.job.clone())
            .collect();
        expired.sort_by_key(|job| job.download_expires_at);
        Ok(expired)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.lock().remove(&job_id).is_some())
    }

    async fn delete_expired_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut jobs = self.lock();
        let expired = jobs.get(&job_id).is_some_and(|s| s.job.is_reapable(now));
        if expired {
            jobs.remove(&job_id);
        }
        Ok(expired)
    }

    async fn fail_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let mut failed = Vec::new();
        for stored in self.lock().values_mut() {
            let stale = stored.job.status == JobStatus::Processing
                && stored
                    .job
                    .processing_started_at
                    .is_some_and(|started| started < started_before);
            if stale {
                stored.job.status = JobStatus::Failed;
                stored.job.failure_reason = Some(reason.to_string());
                stored.job.estimated_ready_at = None;
                stored.lease = None;
                failed.push(stored.job.id);
            }
        }
        Ok(failed)
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
