use chrono::{DateTime, TimeDelta, Utc};

use crate::models::job::TrustTier;

/// How long a download keeps a job alive, by caller tier.
pub fn download_window(tier: TrustTier) -> TimeDelta {
    match tier {
        TrustTier::Anonymous => TimeDelta::seconds(20),
        TrustTier::Authenticated => TimeDelta::minutes(5),
    }
}

/// Longest accepted initial retention (ten years).
pub const MAX_INITIAL_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Owns the retention timers of a job: the initial window granted at
/// submission and the sliding window renewed by each download.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryManager {
    initial_retention: TimeDelta,
}

impl Default for ExpiryManager {
    fn default() -> Self {
        Self::new(TimeDelta::hours(24))
    }
}

impl ExpiryManager {
    pub fn new(initial_retention: TimeDelta) -> Self {
        Self { initial_retention }
    }

    /// `None` when the retention exceeds `MAX_INITIAL_RETENTION_SECS`.
    pub fn from_secs(initial_retention_secs: u64) -> Option<Self> {
        if initial_retention_secs > MAX_INITIAL_RETENTION_SECS {
            return None;
        }
        let secs = i64::try_from(initial_retention_secs).ok()?;
        TimeDelta::try_seconds(secs).map(Self::new)
    }

    /// Expiry assigned at submission, before any download.
    pub fn initial_expiry(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.initial_retention
    }

    /// New expiry after a successful, authorized download.
    pub fn renewed_expiry(&self, tier: TrustTier, now: DateTime<Utc>) -> DateTime<Utc> {
        now + download_window(tier)
    }

    /// Downloads stay available while `now <= expires_at`.
    pub fn is_expired(&self, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        expires_at.is_some_and(|at| now > at)
    }
}
