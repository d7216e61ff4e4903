use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Bucket holding source and processed images
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    /// Region name; "auto" works for R2 and most self-hosted stores
    #[serde(default = "default_region")]
    pub s3_region: String,

    /// Access key ID
    pub s3_access_key: String,

    /// Secret access key
    pub s3_secret_key: String,

    /// HMAC secret used to verify bearer tokens
    pub jwt_secret: String,

    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,

    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,

    /// Download expiry assigned at submission, before the first download.
    #[serde(default = "default_initial_retention_secs")]
    pub initial_retention_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// A job left in `processing` longer than this is marked failed.
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// Concurrent job loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Scrape address for the worker and reaper Prometheus listeners.
    /// Unset means their metrics are not exported.
    #[serde(default)]
    pub metrics_addr: Option<String>,

    /// Prefix for download links in job detail responses
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_jwt_issuer() -> String {
    "image-pro".to_string()
}

fn default_jwt_audience() -> String {
    "image-pro-api".to_string()
}

fn default_initial_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_processing_timeout_secs() -> u64 {
    900
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
