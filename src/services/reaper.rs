use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{JobRepository, RepositoryError};
use crate::models::job::ImageJob;
use crate::services::storage::BlobStore;

pub const STALE_PROCESSING_REASON: &str = "processing timed out";

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub deleted: usize,
    /// Listed as expired, then renewed by a download before the delete.
    pub renewed: usize,
    /// Deleted jobs that left a blob behind in storage.
    pub blob_failures: usize,
    pub record_failures: usize,
}

/// Deletes expired jobs and their blobs, and fails jobs stuck in processing.
pub struct Reaper {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    processing_timeout: TimeDelta,
}

impl Reaper {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        processing_timeout: TimeDelta,
    ) -> Self {
        Self {
            repo,
            storage,
            clock,
            processing_timeout,
        }
    }

    /// Delete every job with `download_expires_at <= now`, whatever its state.
    ///
    /// The record goes first, and only while it is still expired; blobs are
    /// then deleted best-effort. A failure on one job is logged and does not
    /// stop the others.
    pub async fn sweep(&self) -> Result<SweepReport, RepositoryError> {
        let now = self.clock.now();
        let expired = self.repo.list_expired(now).await?;
        let report = self.reap(&expired, now).await;

        metrics::counter!("image_jobs_reaped_total").increment(report.deleted as u64);
        if report.expired > 0 {
            tracing::info!(
                expired = report.expired,
                deleted = report.deleted,
                renewed = report.renewed,
                blob_failures = report.blob_failures,
                record_failures = report.record_failures,
                "Reaper sweep complete"
            );
        }

        Ok(report)
    }

    async fn reap(&self, expired: &[ImageJob], now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for job in expired {
            match self.repo.delete_expired_job(job.id, now).await {
                Ok(true) => {
                    report.deleted += 1;
                    if !self.delete_blobs(job).await {
                        report.blob_failures += 1;
                    }
                    tracing::debug!(job_id = %job.id, status = %job.status, "Reaped expired job");
                }
                Ok(false) => {
                    report.renewed += 1;
                    tracing::debug!(job_id = %job.id, "Job renewed or gone since listing, skipping");
                }
                Err(e) => {
                    report.record_failures += 1;
                    tracing::error!(job_id = %job.id, error = %e, "Failed to delete job record");
                }
            }
        }

        report
    }

    /// Fail jobs that entered `processing` longer ago than the timeout.
    pub async fn fail_stale_processing(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let cutoff = self.clock.now() - self.processing_timeout;
        let failed = self
            .repo
            .fail_stale_processing(cutoff, STALE_PROCESSING_REASON)
            .await?;

        for job_id in &failed {
            tracing::warn!(job_id = %job_id, cutoff = %cutoff, "Failed stale processing job");
        }
        if !failed.is_empty() {
            metrics::counter!("image_jobs_failed_total").increment(failed.len() as u64);
        }
        Ok(failed)
    }

    /// Run both sweeps on a fixed interval, forever.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.fail_stale_processing().await {
                tracing::error!(error = %e, "Stale processing sweep failed");
            }
            if let Err(e) = self.sweep().await {
                tracing::error!(error = %e, "Reaper sweep failed");
            }
        }
    }

    // Deletes are idempotent, so a missing blob counts as deleted.
    async fn delete_blobs(&self, job: &ImageJob) -> bool {
        let source = self.storage.delete(&job.source_key);
        let processed = async {
            match job.processed_key.as_deref() {
                Some(key) => self.storage.delete(key).await,
                None => Ok(()),
            }
        };

        let (source, processed) = futures::future::join(source, processed).await;
        let mut ok = true;
        if let Err(e) = source {
            tracing::warn!(job_id = %job.id, key = %job.source_key, error = %e, "Orphaned source blob");
            ok = false;
        }
        if let Err(e) = processed {
            tracing::warn!(job_id = %job.id, error = %e, "Orphaned processed blob");
            ok = false;
        }
        ok
    }
}
