use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{JobRepository, RepositoryError};
use crate::models::job::{ImageJob, JobStatus};
use crate::services::auth::Requester;
use crate::services::expiry::ExpiryManager;
use crate::services::storage::{BlobStore, StorageError};

/// Why a caller may not read or download a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("You do not have access to this image")]
    Forbidden,

    #[error("Image not ready (status: {0})")]
    NotReady(JobStatus),

    #[error("Download expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Processed image is missing for a completed job")]
    MissingArtifact,
}

/// Authenticated callers see only their own jobs; anonymous callers see
/// only ownerless jobs.
pub fn authorize_view(requester: &Requester, job: &ImageJob) -> Result<(), AccessError> {
    let allowed = match (requester, job.owner_id.as_deref()) {
        (Requester::Authenticated { user_id }, Some(owner)) => user_id == owner,
        (Requester::Anonymous, None) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Full download check. Returns the processed artifact key.
pub fn authorize_download<'a>(
    requester: &Requester,
    job: &'a ImageJob,
    expiry: &ExpiryManager,
    now: DateTime<Utc>,
) -> Result<&'a str, AccessError> {
    authorize_view(requester, job)?;

    if job.status != JobStatus::Completed {
        return Err(AccessError::NotReady(job.status));
    }

    if expiry.is_expired(job.download_expires_at, now) {
        if let Some(expired_at) = job.download_expires_at {
            return Err(AccessError::Expired(expired_at));
        }
    }

    job.processed_key
        .as_deref()
        .ok_or(AccessError::MissingArtifact)
}

/// A processed artifact ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Image {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Mediates job detail reads and downloads.
pub struct AccessGate {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    expiry: ExpiryManager,
}

impl AccessGate {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        expiry: ExpiryManager,
    ) -> Self {
        Self {
            repo,
            storage,
            clock,
            expiry,
        }
    }

    pub async fn job_detail(&self, requester: &Requester, job_id: Uuid) -> Result<ImageJob, GateError> {
        let job = self.load(job_id).await?;
        authorize_view(requester, &job)?;
        Ok(job)
    }

    /// Authorize, fetch the artifact, then renew the download expiry.
    pub async fn download(&self, requester: &Requester, job_id: Uuid) -> Result<Download, GateError> {
        let job = self.load(job_id).await?;
        let now = self.clock.now();

        let key = authorize_download(requester, &job, &self.expiry, now).map_err(|e| {
            tracing::info!(job_id = %job_id, reason = %e, "Download refused");
            e
        })?;

        let bytes = match self.storage.get(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Err(AccessError::MissingArtifact.into()),
            Err(e) => return Err(e.into()),
        };

        let expires_at = self.expiry.renewed_expiry(requester.tier(), now);
        if !self.repo.set_download_expiry(job_id, expires_at).await? {
            // Reaped between the read and the renewal.
            return Err(GateError::NotFound(job_id));
        }

        metrics::counter!("image_downloads_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            tier = %requester.tier(),
            expires_at = %expires_at,
            size_bytes = bytes.len(),
            "Download served"
        );

        Ok(Download {
            filename: job.download_filename(),
            content_type: job.target_format.content_type(),
            bytes,
            expires_at,
        })
    }

    async fn load(&self, job_id: Uuid) -> Result<ImageJob, GateError> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or(GateError::NotFound(job_id))
    }
}
