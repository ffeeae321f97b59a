//! Staleness policy for records loaded from the durable store.

use super::model::SessionRecord;
use chrono::{DateTime, Duration, Utc};

/// Default age after which a durable record counts as abandoned.
pub const DEFAULT_STALE_AFTER_HOURS: i64 = 24;

/// Decides whether a durable record was abandoned on some other device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    threshold: Duration,
}

impl StalenessPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    /// Age of the record's last write at `now`.
    pub fn age(&self, record: &SessionRecord, now: DateTime<Utc>) -> Duration {
        now - record.updated_at
    }

    /// True when the last write is strictly older than the threshold.
    pub fn is_stale(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        self.age(record, now) > self.threshold
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_hours(DEFAULT_STALE_AFTER_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_threshold_boundary() {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let record = SessionRecord::start("owner", "P1", None, start);
        let policy = StalenessPolicy::default();

        assert!(!policy.is_stale(&record, start + Duration::hours(23)));
        assert!(!policy.is_stale(&record, start + Duration::hours(24)));
        assert!(policy.is_stale(&record, start + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_paused_record_uses_updated_at() {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let mut record = SessionRecord::start("owner", "P1", None, start);
        record.pause(start + Duration::hours(20)).unwrap();

        let policy = StalenessPolicy::from_hours(24);
        assert!(!policy.is_stale(&record, start + Duration::hours(30)));
    }
}
