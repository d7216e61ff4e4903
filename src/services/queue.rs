use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::JobRepository;
use crate::models::job::{ImageJob, JobStatus};

const QUEUE_KEY: &str = "image_pro:jobs";
const PROCESSING_KEY: &str = "image_pro:processing";
const DEAD_LETTER_KEY: &str = "image_pro:dead";

/// Job payload serialized into Redis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// A dequeued job together with the exact payload held in the processing list.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    payload: String,
}

/// What to do with a payload found in the processing list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightAction {
    /// Still being worked on, or will be failed by the stale sweep.
    Keep,
    /// The job is terminal or deleted; the delivery was never acknowledged.
    Acknowledge,
    /// Dequeued but never claimed before `stale_before`.
    Requeue,
    /// Not a job payload.
    DeadLetter,
}

/// Decide the fate of one processing-list payload given its job row.
pub fn in_flight_action(
    payload: &str,
    job: Option<&ImageJob>,
    stale_before: DateTime<Utc>,
) -> InFlightAction {
    if serde_json::from_str::<QueuedJob>(payload).is_err() {
        return InFlightAction::DeadLetter;
    }
    match job {
        None => InFlightAction::Acknowledge,
        Some(job) if job.status.is_terminal() => InFlightAction::Acknowledge,
        Some(job) if job.status == JobStatus::Pending && job.created_at < stale_before => {
            InFlightAction::Requeue
        }
        Some(_) => InFlightAction::Keep,
    }
}

/// Counts from one pass over the processing list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub acknowledged: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Fire-and-forget hand-off of a freshly persisted job to the workers.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Redis-backed job queue.
///
/// `RPOPLPUSH` hands each payload to exactly one consumer; the job row's
/// lease guards against anything the queue delivers twice.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    pub async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Pop the oldest job and move it to the processing list.
    pub async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        let Some(payload) = result else {
            return Ok(None);
        };
        match serde_json::from_str::<QueuedJob>(&payload) {
            Ok(job) => Ok(Some(Delivery { job, payload })),
            Err(e) => {
                self.move_payload(PROCESSING_KEY, DEAD_LETTER_KEY, &payload, false).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    /// Acknowledge a delivery (remove it from the processing list).
    pub async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Park a delivery whose handler raised; failed jobs are never retried in place.
    pub async fn dead_letter(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.move_payload(PROCESSING_KEY, DEAD_LETTER_KEY, &delivery.payload, false)
            .await
    }

    /// Put a delivery back at the head of the queue.
    pub async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.move_payload(PROCESSING_KEY, QUEUE_KEY, &delivery.payload, true)
            .await
    }

    /// Settle processing-list entries left behind by a worker that died or
    /// failed to acknowledge. Lookup failures leave the entry for next time.
    pub async fn recover_in_flight(
        &self,
        repo: &dyn JobRepository,
        stale_before: DateTime<Utc>,
    ) -> Result<RecoveryReport, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payloads: Vec<String> = conn
            .lrange(PROCESSING_KEY, 0, -1)
            .await
            .map_err(QueueError::Redis)?;

        let mut report = RecoveryReport::default();
        for payload in payloads {
            let job = match serde_json::from_str::<QueuedJob>(&payload) {
                Ok(queued) => match repo.get_job(queued.job_id).await {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::warn!(job_id = %queued.job_id, error = %e, "Could not look up in-flight job");
                        continue;
                    }
                },
                Err(_) => None,
            };

            match in_flight_action(&payload, job.as_ref(), stale_before) {
                InFlightAction::Keep => {}
                InFlightAction::Acknowledge => {
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                        .await
                        .map_err(QueueError::Redis)?;
                    report.acknowledged += 1;
                }
                InFlightAction::Requeue => {
                    self.move_payload(PROCESSING_KEY, QUEUE_KEY, &payload, true).await?;
                    report.requeued += 1;
                }
                InFlightAction::DeadLetter => {
                    self.move_payload(PROCESSING_KEY, DEAD_LETTER_KEY, &payload, false)
                        .await?;
                    report.dead_lettered += 1;
                }
            }
        }

        Ok(report)
    }

    // Atomically move one payload between lists; `to_head` pushes it where
    // `RPOPLPUSH` reads next.
    async fn move_payload(
        &self,
        from: &str,
        to: &str,
        payload: &str,
        to_head: bool,
    ) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let mut pipe = redis::pipe();
        pipe.atomic().lrem(from, 1, payload).ignore();
        if to_head {
            pipe.rpush(to, payload).ignore();
        } else {
            pipe.lpush(to, payload).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.enqueue(&QueuedJob {
            job_id,
            enqueued_at: Utc::now(),
        })
        .await
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Records submitted job ids in memory; tests drain it to drive workers.
#[derive(Default)]
pub struct MemoryDispatcher {
    submitted: Mutex<Vec<Uuid>>,
    unavailable: Mutex<bool>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything submitted so far, oldest first.
    pub fn drain(&self) -> Vec<Uuid> {
        std::mem::take(&mut *self.submitted.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) = unavailable;
    }
}

#[async_trait]
impl JobDispatcher for MemoryDispatcher {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError> {
        if *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(QueueError::Unavailable);
        }
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(QueueError::Unavailable);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_job_payload_is_stable_json() {
        let job = QueuedJob {
            job_id: Uuid::nil(),
            enqueued_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let payload = serde_json::to_string(&job).unwrap();
        assert_eq!(
            payload,
            r#"{"job_id":"00000000-0000-0000-0000-000000000000","enqueued_at":"1970-01-01T00:00:00Z"}"#
        );
        assert_eq!(serde_json::from_str::<QueuedJob>(&payload).unwrap(), job);
    }

    fn job(status: JobStatus, created_at: DateTime<Utc>) -> ImageJob {
        ImageJob {
            id: Uuid::nil(),
            owner_id: None,
            source_key: "originals/x.png".to_string(),
            processed_key: None,
            target_format: crate::models::job::ImageFormat::Png,
            status,
            failure_reason: None,
            created_at,
            processing_started_at: None,
            processing_completed_at: None,
            estimated_ready_at: None,
            download_expires_at: None,
        }
    }

    #[test]
    fn in_flight_entries_are_settled_by_job_state() {
        let payload = r#"{"job_id":"00000000-0000-0000-0000-000000000000","enqueued_at":"1970-01-01T00:00:00Z"}"#;
        let cutoff = DateTime::from_timestamp(1_000, 0).unwrap();
        let old = DateTime::from_timestamp(10, 0).unwrap();
        let recent = DateTime::from_timestamp(2_000, 0).unwrap();

        assert_eq!(in_flight_action(payload, None, cutoff), InFlightAction::Acknowledge);
        for status in [JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(
                in_flight_action(payload, Some(&job(status, old)), cutoff),
                InFlightAction::Acknowledge
            );
        }
        assert_eq!(
            in_flight_action(payload, Some(&job(JobStatus::Pending, old)), cutoff),
            InFlightAction::Requeue
        );
        assert_eq!(
            in_flight_action(payload, Some(&job(JobStatus::Pending, recent)), cutoff),
            InFlightAction::Keep
        );
        assert_eq!(
            in_flight_action(payload, Some(&job(JobStatus::Processing, old)), cutoff),
            InFlightAction::Keep
        );
        assert_eq!(in_flight_action("not json", None, cutoff), InFlightAction::DeadLetter);
    }

    #[tokio::test]
    async fn memory_dispatcher_records_in_order() {
        let dispatcher = MemoryDispatcher::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        dispatcher.submit(a).await.unwrap();
        dispatcher.submit(b).await.unwrap();
        assert_eq!(dispatcher.drain(), vec![a, b]);
        assert!(dispatcher.drain().is_empty());
    }

    #[tokio::test]
    async fn unavailable_dispatcher_rejects_submissions() {
        let dispatcher = MemoryDispatcher::new();
        dispatcher.set_unavailable(true);
        assert!(matches!(
            dispatcher.submit(Uuid::new_v4()).await,
            Err(QueueError::Unavailable)
        ));
    }
}
