use image_pro::{
    clock::SystemClock,
    config::AppConfig,
    db::{self, PgJobRepository},
    routes::metrics::describe_metrics,
    services::{
        pipeline::PipelineExecutor,
        queue::{JobQueue, QueueError},
        storage::S3BlobStore,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const QUEUE_DEPTH_INTERVAL: Duration = Duration::from_secs(15);

struct Worker {
    queue: JobQueue,
    executor: PipelineExecutor,
    poll_interval: Duration,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let worker = Arc::new(Worker {
        queue,
        executor: PipelineExecutor::new(
            Arc::new(PgJobRepository::new(db_pool)),
            Arc::new(storage),
            Arc::new(SystemClock),
        ),
        poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
    });

    let concurrency = config.worker_concurrency.max(1);
    tracing::info!(concurrency, "Worker ready, starting job processing loops");

    let mut loops = Vec::with_capacity(concurrency + 1);
    for slot in 0..concurrency {
        let worker = worker.clone();
        loops.push(tokio::spawn(async move { worker.run(slot).await }));
    }
    let monitor = worker.clone();
    loops.push(tokio::spawn(async move { monitor.report_queue_depth().await }));

    for handle in futures::future::join_all(loops).await {
        if let Err(e) = handle {
            tracing::error!(error = %e, "Worker loop exited");
        }
    }
}

impl Worker {
    async fn run(&self, slot: usize) {
        loop {
            match self.process_next_job().await {
                Ok(true) => {
                    tracing::debug!(slot, "Job handled, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!(slot, "No jobs available, sleeping");
                    sleep(self.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "Queue error, will retry");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Handle the next delivery. Returns Ok(false) if the queue was empty.
    ///
    /// Settling the delivery afterwards is best-effort: an entry left in the
    /// processing list is recovered by the reaper.
    async fn process_next_job(&self) -> Result<bool, QueueError> {
        let Some(delivery) = self.queue.dequeue().await? else {
            return Ok(false);
        };
        let job_id = delivery.job.job_id;

        tracing::info!(job_id = %job_id, enqueued_at = %delivery.job.enqueued_at, "Processing image job");

        let settled = match self.executor.run(job_id).await {
            Ok(_) => self.queue.complete(&delivery).await,
            Err(e) if e.is_skip() => {
                tracing::info!(job_id = %job_id, reason = %e, "Skipping job");
                self.queue.complete(&delivery).await
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not claim job, re-queueing");
                let requeued = self.queue.requeue(&delivery).await;
                sleep(self.poll_interval).await;
                requeued
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Moving failed job to dead-letter list");
                self.queue.dead_letter(&delivery).await
            }
        };

        if let Err(e) = settled {
            tracing::error!(job_id = %job_id, error = %e, "Failed to settle delivery, leaving it for recovery");
        }

        Ok(true)
    }

    async fn report_queue_depth(&self) {
        loop {
            match self.queue.queue_depth().await {
                Ok(depth) => metrics::gauge!("image_queue_depth").set(depth as f64),
                Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
            }
            sleep(QUEUE_DEPTH_INTERVAL).await;
        }
    }
}
