use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_pro::{
    app_state::AppState,
    clock::SystemClock,
    config::AppConfig,
    db::{self, PgJobRepository},
    routes,
    services::{
        auth::TokenVerifier, expiry::ExpiryManager, queue::JobQueue, storage::S3BlobStore,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let expiry = ExpiryManager::from_secs(config.initial_retention_secs)
        .expect("INITIAL_RETENTION_SECS out of range");

    tracing::info!("Initializing image-pro server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(bucket = %config.s3_bucket, "Initializing object storage client");
    let storage = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let verifier = TokenVerifier::new(&config.jwt_secret, &config.jwt_issuer, &config.jwt_audience);

    let state = AppState::new(
        Arc::new(PgJobRepository::new(db_pool)),
        Arc::new(storage),
        Arc::new(queue),
        Arc::new(SystemClock),
        verifier,
        expiry,
        &config.public_base_url,
    );

    let app = routes::router(state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::MAX_REQUEST_BYTES));

    tracing::info!("Starting image-pro on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
