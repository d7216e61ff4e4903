use chrono::TimeDelta;
use image_pro::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    db::{self, JobRepository, PgJobRepository},
    routes::metrics::describe_metrics,
    services::{
        queue::{JobQueue, RecoveryReport},
        reaper::Reaper,
        storage::S3BlobStore,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image reaper");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving reaper metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let storage = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    let processing_timeout = i64::try_from(config.processing_timeout_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .expect("PROCESSING_TIMEOUT_SECS out of range");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let repo: Arc<dyn JobRepository> = Arc::new(PgJobRepository::new(db_pool));
    let reaper = Reaper::new(
        repo.clone(),
        Arc::new(storage),
        Arc::new(SystemClock),
        processing_timeout,
    );

    let interval = Duration::from_secs(config.reaper_interval_secs.max(1));
    tracing::info!(
        interval_secs = interval.as_secs(),
        processing_timeout_secs = config.processing_timeout_secs,
        "Reaper ready"
    );

    tokio::join!(
        reaper.run(interval),
        recover_in_flight(queue, repo, processing_timeout, interval),
    );
}

/// Settle queue deliveries that no worker acknowledged.
async fn recover_in_flight(
    queue: JobQueue,
    repo: Arc<dyn JobRepository>,
    processing_timeout: TimeDelta,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let stale_before = SystemClock.now() - processing_timeout;
        match queue.recover_in_flight(repo.as_ref(), stale_before).await {
            Ok(report) if report != RecoveryReport::default() => tracing::info!(
                acknowledged = report.acknowledged,
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                "Recovered in-flight deliveries"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "In-flight recovery failed"),
        }
    }
}
