mod fixtures;

use chrono::{TimeDelta, Utc};
use image_pro::{
    clock::SystemClock,
    config::AppConfig,
    db::{self, JobRepository, PgJobRepository},
    models::job::{self, ImageFormat, JobStatus, NewJob},
    models::operation::{FilterKind, FilterParams, Operation, ResizeParams},
    services::{
        pipeline::PipelineExecutor,
        queue::{JobDispatcher, JobQueue},
        storage::{BlobStore, S3BlobStore},
    },
};
use std::sync::Arc;
use uuid::Uuid;

struct Infra {
    repo: Arc<PgJobRepository>,
    storage: Arc<S3BlobStore>,
    queue: JobQueue,
}

async fn connect() -> Infra {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let storage = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");

    Infra {
        repo: Arc::new(PgJobRepository::new(db_pool)),
        storage: Arc::new(storage),
        queue,
    }
}

/// Integration test: full processing flow against real infrastructure
///
/// 1. Source upload to object storage
/// 2. Job and operations persisted in PostgreSQL
/// 3. Queue round trip through Redis
/// 4. Pipeline execution with lease fencing
/// 5. Expiry scan and deletion
///
/// Note: This requires running PostgreSQL, Redis and S3-compatible storage
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let infra = connect().await;
    let now = Utc::now();

    // 1. Source upload
    let id = Uuid::new_v4();
    let source_key = job::source_key(id, "png");
    infra
        .storage
        .put(&source_key, &fixtures::encoded(48, 32, image::ImageFormat::Png), "image/png")
        .await
        .expect("Source upload failed");

    // 2. Job creation
    let created = infra
        .repo
        .create_job(&NewJob {
            id,
            owner_id: Some("integration-user".to_string()),
            source_key: source_key.clone(),
            target_format: ImageFormat::Webp,
            operations: vec![
                Operation::Filter(FilterParams {
                    kind: FilterKind::Grayscale,
                }),
                Operation::Resize(ResizeParams {
                    width: 12,
                    height: 8,
                }),
            ],
            created_at: now,
            download_expires_at: now + TimeDelta::hours(1),
        })
        .await
        .expect("Failed to create job");
    assert_eq!(created.status, JobStatus::Pending);

    let operations = infra.repo.list_operations(id).await.expect("List operations");
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0].operation.kind().to_string(), "filter");
    assert_eq!(operations[1].position, 1);

    // 3. Queue round trip
    infra.queue.submit(id).await.expect("Failed to enqueue");
    let delivery = infra
        .queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No job in queue");
    assert_eq!(delivery.job.job_id, id);

    // 4. Pipeline execution
    let executor = PipelineExecutor::new(
        infra.repo.clone(),
        infra.storage.clone(),
        Arc::new(SystemClock),
    );
    let completed = executor.run(id).await.expect("Pipeline failed");
    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.estimated_ready_at.is_none());

    let processed_key = completed.processed_key.clone().expect("processed key");
    let output = infra
        .storage
        .get(&processed_key)
        .await
        .expect("Processed download failed");
    let decoded = image::load_from_memory(&output).expect("Output decodes");
    assert_eq!((decoded.width(), decoded.height()), (12, 8));

    // A second delivery of the same job cannot claim it again.
    let replay = executor.run(id).await.expect_err("Replay must be skipped");
    assert!(replay.is_skip());

    infra
        .queue
        .complete(&delivery)
        .await
        .expect("Failed to acknowledge delivery");

    // 5. Expiry scan and cleanup
    let expired = infra
        .repo
        .list_expired(now + TimeDelta::hours(2))
        .await
        .expect("Expiry scan failed");
    assert!(expired.iter().any(|j| j.id == id));

    // Still inside the window: the conditional delete leaves it alone.
    assert!(!infra
        .repo
        .delete_expired_job(id, now)
        .await
        .expect("Conditional delete failed"));

    infra.storage.delete(&source_key).await.expect("Delete source");
    infra.storage.delete(&processed_key).await.expect("Delete output");
    assert!(infra
        .repo
        .delete_expired_job(id, now + TimeDelta::hours(2))
        .await
        .expect("Delete job"));
    assert!(infra.repo.get_job(id).await.expect("Get job").is_none());
    assert!(infra.repo.list_operations(id).await.expect("List").is_empty());

    println!("✅ All integration tests passed!");
}

#[tokio::test]
#[ignore]
async fn test_stale_processing_is_failed() {
    let infra = connect().await;
    let now = Utc::now();
    let id = Uuid::new_v4();

    infra
        .repo
        .create_job(&NewJob {
            id,
            owner_id: None,
            source_key: job::source_key(id, "png"),
            target_format: ImageFormat::Png,
            operations: vec![Operation::Filter(FilterParams {
                kind: FilterKind::Blur,
            })],
            created_at: now,
            download_expires_at: now + TimeDelta::hours(1),
        })
        .await
        .expect("Failed to create job");

    infra
        .repo
        .claim_job(&db::JobClaim {
            job_id: id,
            lease: Uuid::new_v4(),
            started_at: now - TimeDelta::hours(1),
            estimated_ready_at: now,
        })
        .await
        .expect("Claim failed")
        .expect("Job was pending");

    let failed = infra
        .repo
        .fail_stale_processing(now - TimeDelta::minutes(15), "processing timed out")
        .await
        .expect("Sweep failed");
    assert!(failed.contains(&id));

    let job = infra.repo.get_job(id).await.expect("Get job").expect("Exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason.as_deref(), Some("processing timed out"));

    infra.repo.delete_job(id).await.expect("Cleanup");
}

#[tokio::test]
#[ignore]
async fn test_unacknowledged_delivery_is_recovered() {
    let infra = connect().await;
    let now = Utc::now();
    let id = Uuid::new_v4();

    infra
        .repo
        .create_job(&NewJob {
            id,
            owner_id: None,
            source_key: job::source_key(id, "png"),
            target_format: ImageFormat::Png,
            operations: vec![Operation::Filter(FilterParams {
                kind: FilterKind::Sharpen,
            })],
            created_at: now,
            download_expires_at: now + TimeDelta::hours(1),
        })
        .await
        .expect("Failed to create job");

    infra.queue.submit(id).await.expect("Failed to enqueue");
    let delivery = infra
        .queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No job in queue");
    assert_eq!(delivery.job.job_id, id);

    // Worker vanished without acknowledging; the job was reaped since.
    infra.repo.delete_job(id).await.expect("Delete job");

    let report = infra
        .queue
        .recover_in_flight(infra.repo.as_ref(), now - TimeDelta::minutes(15))
        .await
        .expect("Recovery failed");
    assert!(report.acknowledged >= 1);

    let again = infra
        .queue
        .recover_in_flight(infra.repo.as_ref(), now - TimeDelta::minutes(15))
        .await
        .expect("Recovery failed");
    assert_eq!(again.acknowledged, 0);
}

#[tokio::test]
#[ignore]
async fn test_health_checks() {
    let infra = connect().await;
    infra.repo.health_check().await.expect("Database unreachable");
    infra.queue.health_check().await.expect("Redis unreachable");
}
