//! Pipeline executor.
//!
//! Drives one job through `pending -> processing -> {completed, failed}`:
//!
//! 1. Claim the job under a fresh lease and record the ready estimate.
//! 2. Load the source blob and the operations in creation order.
//! 3. Apply the operations to an in-memory buffer (on the blocking pool).
//! 4. Encode once with the final target format and last-seen quality.
//! 5. Store the artifact and complete the job, fenced by the lease.
//!
//! Any failure after the claim fails the job and is returned to the caller
//! so the queue can dead-letter it. There is no partial or resumed execution.

use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{JobClaim, JobCompletion, JobRepository, RepositoryError};
use crate::models::job::{self, ImageFormat, ImageJob, JobStatus};
use crate::models::operation::Operation;
use crate::services::estimator::{self, CompletionEstimator};
use crate::services::imaging::{self, ImagingError};
use crate::services::storage::{BlobStore, StorageError};

/// Quality used when no `compress` operation is present.
pub const DEFAULT_QUALITY: u8 = 85;

/// Upper bound on the pixel count of any intermediate buffer.
pub const MAX_OUTPUT_PIXELS: u64 = 64 * 1024 * 1024;

/// Encode settings accumulated while walking the operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub format: ImageFormat,
    pub quality: u8,
}

/// Encoded output of a job.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub bytes: Vec<u8>,
    pub settings: EncodeSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {job_id} is {status}, not pending")]
    NotPending { job_id: Uuid, status: JobStatus },

    #[error("Could not claim job: {0}")]
    ClaimFailed(#[source] RepositoryError),

    #[error("Job {0} changed state while processing; result discarded")]
    ClaimLost(Uuid),

    #[error("Source image unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Image task aborted: {0}")]
    Task(String),
}

impl ProcessingError {
    /// The job was never ours to run; nothing was changed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ProcessingError::JobNotFound(_)
                | ProcessingError::NotPending { .. }
                | ProcessingError::ClaimLost(_)
        )
    }

    /// The claim itself failed, so the job is still pending and may be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::ClaimFailed(_))
    }
}

/// Apply `operations` in order.
///
/// `compress` only records the quality (last one wins) and `convert` only
/// records the target format; neither touches pixels.
pub fn apply_operations(
    mut image: DynamicImage,
    operations: &[Operation],
    format: ImageFormat,
) -> Result<(DynamicImage, EncodeSettings), ImagingError> {
    let mut settings = EncodeSettings {
        format,
        quality: DEFAULT_QUALITY,
    };

    for operation in operations {
        match operation {
            Operation::Resize(params) => {
                let pixels = u64::from(params.width) * u64::from(params.height);
                if pixels > MAX_OUTPUT_PIXELS {
                    return Err(ImagingError::TooLarge {
                        width: params.width,
                        height: params.height,
                        limit: MAX_OUTPUT_PIXELS,
                    });
                }
                image = imaging::resize(&image, params.width, params.height);
            }
            Operation::Compress(params) => {
                settings.quality = params.quality.clamp(1, 100) as u8;
            }
            Operation::Filter(params) => {
                image = imaging::apply_filter(&image, params.kind);
            }
            Operation::Convert(params) => {
                settings.format = params.format;
            }
        }
    }

    Ok((image, settings))
}

/// Decode, transform and encode in one pass. CPU bound.
pub fn render(
    source: &[u8],
    operations: &[Operation],
    format: ImageFormat,
) -> Result<Rendition, ImagingError> {
    let image = imaging::open(source)?;
    let (image, settings) = apply_operations(image, operations, format)?;
    let bytes = imaging::encode(&image, settings.format, settings.quality)?;
    Ok(Rendition { bytes, settings })
}

pub struct PipelineExecutor {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    estimator: CompletionEstimator,
}

impl PipelineExecutor {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let estimator = CompletionEstimator::new(repo.clone());
        Self {
            repo,
            storage,
            clock,
            estimator,
        }
    }

    /// Run a job end to end. Returns the completed job.
    pub async fn run(&self, job_id: Uuid) -> Result<ImageJob, ProcessingError> {
        let started_at = self.clock.now();
        let estimated_ready_at = match self.estimator.estimate(started_at).await {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Estimate unavailable, using default");
                started_at + estimator::default_estimate()
            }
        };

        let lease = Uuid::new_v4();
        let claim = JobClaim {
            job_id,
            lease,
            started_at,
            estimated_ready_at,
        };

        let job = match self.repo.claim_job(&claim).await {
            Ok(Some(job)) => job,
            Ok(None) => return Err(self.unclaimable(job_id).await),
            Err(e) => return Err(ProcessingError::ClaimFailed(e)),
        };

        tracing::info!(
            job_id = %job_id,
            estimated_ready_at = %estimated_ready_at,
            "Job processing started"
        );

        let timer = Instant::now();
        match self.execute(&job, lease).await {
            Ok(completed) => {
                let elapsed = timer.elapsed();
                metrics::histogram!("image_processing_seconds").record(elapsed.as_secs_f64());
                metrics::counter!("image_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    format = %completed.target_format,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                Ok(completed)
            }
            Err(ProcessingError::ClaimLost(id)) => {
                tracing::warn!(job_id = %id, "Job left processing under us, result discarded");
                Err(ProcessingError::ClaimLost(id))
            }
            Err(e) => {
                let reason = e.to_string();
                match self.repo.fail_job(job_id, Some(lease), &reason).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, "Job no longer held when marking failed")
                    }
                    Err(db) => {
                        tracing::error!(job_id = %job_id, error = %db, "Failed to mark job failed")
                    }
                }
                metrics::counter!("image_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = %reason, "Job processing failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &ImageJob, lease: Uuid) -> Result<ImageJob, ProcessingError> {
        let operations: Vec<Operation> = self
            .repo
            .list_operations(job.id)
            .await?
            .into_iter()
            .map(|record| record.operation)
            .collect();

        tracing::debug!(job_id = %job.id, key = %job.source_key, "Downloading source image");
        let source = self.storage.get(&job.source_key).await?;

        let format = job.target_format;
        let rendition = tokio::task::spawn_blocking(move || render(&source, &operations, format))
            .await
            .map_err(|e| ProcessingError::Task(e.to_string()))??;

        let settings = rendition.settings;
        let key = job::processed_key(job.id, settings.format);
        self.storage
            .put(&key, &rendition.bytes, settings.format.content_type())
            .await?;

        let completion = JobCompletion {
            job_id: job.id,
            lease,
            processed_key: key.clone(),
            target_format: settings.format,
            completed_at: self.clock.now(),
        };

        match self.repo.complete_job(&completion).await {
            Ok(Some(completed)) => Ok(completed),
            Ok(None) => {
                self.discard_artifact(job.id, &key).await;
                Err(ProcessingError::ClaimLost(job.id))
            }
            Err(e) => {
                self.discard_artifact(job.id, &key).await;
                Err(e.into())
            }
        }
    }

    async fn discard_artifact(&self, job_id: Uuid, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to discard artifact");
        }
    }

    async fn unclaimable(&self, job_id: Uuid) -> ProcessingError {
        match self.repo.get_job(job_id).await {
            Ok(Some(job)) => ProcessingError::NotPending {
                job_id,
                status: job.status,
            },
            Ok(None) => ProcessingError::JobNotFound(job_id),
            Err(e) => ProcessingError::ClaimFailed(e),
        }
    }
}
