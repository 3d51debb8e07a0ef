//! Age-based retention.
//!
//! An artifact becomes eligible for deletion once its age (time since last
//! modification) strictly exceeds the retention window. The policy is pure;
//! the artifact store applies it to the local and remote listings
//! independently.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::BackupArtifact;
use crate::error::{ConfigError, RetentionError};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    days: u32,
}

impl RetentionPolicy {
    /// A window of `days` whole days; zero is rejected
    pub fn from_days(days: u32) -> Result<Self, ConfigError> {
        if days == 0 {
            return Err(ConfigError::ValidationError(
                "retention_days must be at least 1".to_string(),
            ));
        }
        Ok(Self { days })
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.days).saturating_mul(SECONDS_PER_DAY))
    }

    pub fn should_delete(&self, age: Duration) -> bool {
        age > self.window()
    }

    /// Artifacts past the window at `now`, in listing order
    pub fn select_expired<'a>(
        &self,
        artifacts: &'a [BackupArtifact],
        now: DateTime<Utc>,
    ) -> Vec<&'a BackupArtifact> {
        artifacts
            .iter()
            .filter(|artifact| self.should_delete(artifact.age(now)))
            .collect()
    }
}

/// `now - modified`, saturating at zero when `modified` lies in the future
pub fn age_of(modified: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - modified).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionScope {
    Local,
    Remote,
}

/// Outcome of one sweep. Failures are collected, never raised.
#[derive(Debug)]
pub struct RetentionReport {
    pub scope: RetentionScope,
    pub examined: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<RetentionError>,
}

impl RetentionReport {
    pub fn new(scope: RetentionScope) -> Self {
        Self {
            scope,
            examined: 0,
            deleted: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_aged(name: &str, now: DateTime<Utc>, days: i64) -> BackupArtifact {
        BackupArtifact::from_remote(name, now - chrono::Duration::days(days), 1).unwrap()
    }

    #[test]
    fn test_zero_days_rejected() {
        let err = RetentionPolicy::from_days(0).unwrap_err();
        assert!(err.to_string().contains("retention_days must be at least 1"));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let policy = RetentionPolicy::from_days(30).unwrap();
        let window = Duration::from_secs(30 * SECONDS_PER_DAY);
        assert!(!policy.should_delete(window));
        assert!(policy.should_delete(window + Duration::from_millis(1)));
    }

    #[test]
    fn test_forty_and_ten_day_artifacts() {
        let now = Utc::now();
        let policy = RetentionPolicy::from_days(30).unwrap();
        let artifacts = vec![
            artifact_aged("backup_20240101_000000.sql", now, 40),
            artifact_aged("backup_20240131_000000.sql", now, 10),
        ];

        let expired = policy.select_expired(&artifacts, now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, "backup_20240101_000000.sql");
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let now = Utc::now();
        let future = now + chrono::Duration::days(3);
        assert_eq!(age_of(future, now), Duration::ZERO);
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let policy = RetentionPolicy::from_days(u32::MAX).unwrap();
        assert_eq!(
            policy.window().as_secs(),
            u64::from(u32::MAX) * SECONDS_PER_DAY
        );
        let century = Duration::from_secs(100 * 365 * SECONDS_PER_DAY);
        assert!(!policy.should_delete(century));
    }
}
