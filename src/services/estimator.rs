use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

use crate::db::{JobRepository, RepositoryError};

/// Number of recent completions averaged into an estimate.
pub const HISTORY_WINDOW: i64 = 10;

/// Estimate used when no job has completed yet.
pub fn default_estimate() -> TimeDelta {
    TimeDelta::seconds(8)
}

/// Mean of the given durations, ignoring negative samples (clock skew).
/// A zero mean counts as no estimate.
pub fn average_duration(samples: &[TimeDelta]) -> Option<TimeDelta> {
    let valid: Vec<i64> = samples
        .iter()
        .filter(|d| **d >= TimeDelta::zero())
        .filter_map(|d| d.num_microseconds())
        .collect();

    if valid.is_empty() {
        return None;
    }

    let total: i128 = valid.iter().map(|us| *us as i128).sum();
    let mean = total / valid.len() as i128;
    (mean > 0).then(|| TimeDelta::microseconds(mean as i64))
}

pub fn estimate_ready_at(now: DateTime<Utc>, samples: &[TimeDelta]) -> DateTime<Utc> {
    now + average_duration(samples).unwrap_or_else(default_estimate)
}

/// Advisory ready-time estimates from completion history.
pub struct CompletionEstimator {
    repo: Arc<dyn JobRepository>,
}

impl CompletionEstimator {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    pub async fn estimate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RepositoryError> {
        let samples = self.repo.recent_processing_durations(HISTORY_WINDOW).await?;
        Ok(estimate_ready_at(now, &samples))
    }
}
