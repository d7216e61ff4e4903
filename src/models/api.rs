use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{ImageFormat, ImageJob, JobStatus};

/// Response after submitting an image for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub format: ImageFormat,
    pub download_expires_at: Option<DateTime<Utc>>,
}

impl From<&ImageJob> for SubmitResponse {
    fn from(job: &ImageJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            format: job.target_format,
            download_expires_at: job.download_expires_at,
        }
    }
}

/// Response for querying a single job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobDetailResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub format: ImageFormat,
    pub created_at: DateTime<Utc>,
    /// Seconds until the advisory ready estimate; only while processing.
    pub estimated_seconds_remaining: Option<i64>,
    /// Null until the job has completed.
    pub download_url: Option<String>,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobDetailResponse {
    pub fn from_job(job: &ImageJob, now: DateTime<Utc>, base_url: &str) -> Self {
        let estimated_seconds_remaining = match (job.status, job.estimated_ready_at) {
            (JobStatus::Processing, Some(ready_at)) => Some((ready_at - now).num_seconds().max(0)),
            _ => None,
        };

        let download_url = (job.status == JobStatus::Completed).then(|| {
            format!(
                "{}/api/v1/images/{}/download",
                base_url.trim_end_matches('/'),
                job.id
            )
        });

        Self {
            id: job.id,
            status: job.status,
            format: job.target_format,
            created_at: job.created_at,
            estimated_seconds_remaining,
            download_url,
            download_expires_at: job.download_expires_at,
            error: job.failure_reason.clone(),
        }
    }
}

/// Response for listing the caller's jobs.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobDetailResponse>,
}
