use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, VariantNames};
use uuid::Uuid;

use crate::models::operation::Operation;

/// Lifecycle state of an image job.
///
/// `pending -> processing -> {completed, failed}`; both end states are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Output encodings a job can target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Trust tier of a caller or job, which selects quotas and retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Authenticated,
    Anonymous,
}

/// One submitted image and its lifecycle state.
///
/// The trust tier is derived from `owner_id`, so a job can never be both
/// owned and anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageJob {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub source_key: String,
    /// Set if and only if `status == Completed`.
    pub processed_key: Option<String>,
    pub target_format: ImageFormat,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    /// Only set while `status == Processing`.
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub download_expires_at: Option<DateTime<Utc>>,
}

impl ImageJob {
    pub fn trust_tier(&self) -> TrustTier {
        match self.owner_id {
            Some(_) => TrustTier::Authenticated,
            None => TrustTier::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner_id.is_none()
    }

    /// Whether the job has reached its download expiry and may be reaped.
    pub fn is_reapable(&self, now: DateTime<Utc>) -> bool {
        self.download_expires_at.is_some_and(|at| at <= now)
    }

    /// Filename offered to clients downloading the processed artifact.
    pub fn download_filename(&self) -> String {
        format!("processed_{}.{}", self.id, self.target_format.extension())
    }
}

/// Everything needed to persist a freshly validated submission.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub source_key: String,
    pub target_format: ImageFormat,
    pub operations: Vec<Operation>,
    pub created_at: DateTime<Utc>,
    pub download_expires_at: DateTime<Utc>,
}

/// Object key of the uploaded source bytes.
pub fn source_key(job_id: Uuid, extension: &str) -> String {
    format!("originals/{}.{}", job_id, extension)
}

/// Object key of the processed artifact. Unique per job, so concurrent
/// workers never collide.
pub fn processed_key(job_id: Uuid, format: ImageFormat) -> String {
    format!("processed/processed_{}.{}", job_id, format.extension())
}
