use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{JobRepository, RepositoryError};
use crate::models::job::{self, ImageFormat, ImageJob, NewJob};
use crate::models::operation::RawOperation;
use crate::services::auth::Requester;
use crate::services::expiry::ExpiryManager;
use crate::services::imaging;
use crate::services::queue::{JobDispatcher, QueueError};
use crate::services::storage::{BlobStore, StorageError};
use crate::services::validation::{self, ValidationError};

/// An upload as received from the transport layer.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    pub source: Vec<u8>,
    /// Falls back to `jpg` when absent.
    pub target_format: Option<String>,
    pub operations: Vec<RawOperation>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to persist job: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}

/// Accepts uploads: validates, stores the source, persists a pending job and
/// dispatches it exactly once.
pub struct SubmissionService {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn BlobStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    clock: Arc<dyn Clock>,
    expiry: ExpiryManager,
}

impl SubmissionService {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        clock: Arc<dyn Clock>,
        expiry: ExpiryManager,
    ) -> Self {
        Self {
            repo,
            storage,
            dispatcher,
            clock,
            expiry,
        }
    }

    /// Nothing is persisted unless validation passes for the whole request.
    /// A failure after the upload is stored rolls back what was written.
    pub async fn submit(
        &self,
        requester: &Requester,
        request: SubmissionRequest,
    ) -> Result<ImageJob, SubmissionError> {
        let tier = requester.tier();
        let target_format = match request.target_format.as_deref() {
            Some(value) if !value.trim().is_empty() => validation::parse_format(value)?,
            _ => ImageFormat::default(),
        };
        let operations =
            validation::validate_submission(tier, request.source.len(), &request.operations)?;
        let source_format =
            imaging::sniff_format(&request.source).ok_or(ValidationError::UnsupportedImage)?;

        let id = Uuid::new_v4();
        let created_at = self.clock.now();
        let source_key = job::source_key(id, source_format.extension());

        self.storage
            .put(&source_key, &request.source, source_format.content_type())
            .await?;

        let new_job = NewJob {
            id,
            owner_id: requester.user_id().map(str::to_string),
            source_key: source_key.clone(),
            target_format,
            operations,
            created_at,
            download_expires_at: self.expiry.initial_expiry(created_at),
        };

        let job = match self.repo.create_job(&new_job).await {
            Ok(job) => job,
            Err(e) => {
                self.discard_source(id, &source_key).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.dispatcher.submit(id).await {
            tracing::error!(job_id = %id, error = %e, "Failed to enqueue job, rolling back");
            if let Err(db) = self.repo.delete_job(id).await {
                tracing::error!(job_id = %id, error = %db, "Failed to roll back job record");
            }
            self.discard_source(id, &source_key).await;
            return Err(e.into());
        }

        metrics::counter!("image_jobs_submitted_total", "tier" => tier.to_string()).increment(1);
        tracing::info!(
            job_id = %id,
            tier = %tier,
            format = %target_format,
            operations = new_job.operations.len(),
            size_bytes = request.source.len(),
            "Image job submitted"
        );

        Ok(job)
    }

    async fn discard_source(&self, job_id: Uuid, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to discard upload");
        }
    }
}
